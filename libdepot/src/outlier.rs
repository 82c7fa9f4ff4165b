//! Per-group local outlier detection.
//!
//! Every member of a group is compared against all of its group-mates
//! (`k = |group| - 1`), using a local outlier factor: the ratio between the
//! average local density of a point's neighbours and its own. Members whose
//! factor exceeds the threshold move to the overflow group.

use ndarray::prelude::*;

use crate::metricdata::{MetricData, Subset};
use crate::partition::Partition;

/// Added to mean distances so coincident points keep a finite density.
const DENSITY_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    threshold: f64,
    min_size: usize,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self {
            threshold: 1.5,
            min_size: 1,
        }
    }
}

impl OutlierFilter {
    pub fn new(threshold: f64) -> Self {
        assert!(threshold >= 1.0, "a local outlier factor threshold below 1 flags inliers");
        Self {
            threshold,
            ..Default::default()
        }
    }

    /// Smallest size a group may be filtered down to. Values below 1 are
    /// treated as 1, so no group is ever emptied.
    pub fn with_min_size(self, min_size: usize) -> Self {
        Self {
            min_size: min_size.max(1),
            ..self
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Local outlier factor of every point of `data`, with each point's
    /// neighbourhood being all the other points.
    ///
    /// Densities are inverse mean distances without reachability smoothing:
    /// when the neighbourhood is the whole group, every k-distance is the
    /// distance to the farthest member and smoothing flattens all factors
    /// towards 1. Unreachable (infinite) pairs lower a point's density in
    /// proportion to how many of its mates it cannot reach.
    pub fn local_outlier_factors<D: MetricData>(&self, data: &D) -> Array1<f64> {
        let n = data.num_points();
        if n < 2 {
            return Array1::ones(n);
        }

        let mut row = vec![0.0; n];
        let density: Array1<f64> = (0..n)
            .map(|p| {
                data.all_distances(p, &mut row);
                let finite: Vec<f64> = row
                    .iter()
                    .enumerate()
                    .filter(|&(o, d)| o != p && d.is_finite())
                    .map(|(_, &d)| d)
                    .collect();
                if finite.is_empty() {
                    return 0.0;
                }
                let mean = finite.iter().sum::<f64>() / finite.len() as f64;
                let reachable = finite.len() as f64 / (n - 1) as f64;
                reachable / (mean + DENSITY_EPS)
            })
            .collect();

        let total = density.sum();
        density.mapv(|own| {
            let neighbours = (total - own) / (n - 1) as f64;
            neighbours / own
        })
    }

    /// Moves the outliers of every regular group into the overflow group.
    ///
    /// Outliers leave one at a time, the highest factor first, and factors
    /// are recomputed after every removal. A group stops shrinking once it
    /// has no outlier left or is down to the minimum size, so filtering a
    /// filtered partition changes nothing and no group drops below the
    /// minimum.
    pub fn filter<D: MetricData + Subset>(&self, partition: &Partition, data: &D) -> Partition {
        let mut filtered = partition.clone();
        let groups: Vec<(String, Vec<usize>)> = partition
            .regular_groups()
            .map(|(label, members)| (label.to_string(), members.to_vec()))
            .collect();

        for (label, mut members) in groups {
            while members.len() > self.min_size {
                let lof = self.local_outlier_factors(&data.subset(members.iter().copied()));
                let worst = lof
                    .iter()
                    .enumerate()
                    .filter(|(_, &f)| f > self.threshold)
                    .max_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map(|(i, _)| i);
                let Some(i) = worst else {
                    break;
                };
                let point = members.remove(i);
                log::debug!("group {label}: moving {point} (factor {}) to overflow", lof[i]);
                filtered.move_to_overflow(&label, point);
            }
        }

        filtered
    }
}
