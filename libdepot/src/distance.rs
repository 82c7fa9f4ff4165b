//! Pairwise distance matrices, either computed locally with the haversine
//! formula or assembled from batched calls to an external travel-distance
//! provider.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{self, haversine_distance, GeoPoint};

/// Rows of provider results: one per origin, one entry per destination.
/// `None` marks a pair the provider could not route.
pub type ProviderRows = Vec<Vec<Option<f64>>>;

/// A batched origin × destination travel-distance service.
///
/// Implementations must give up once `timeout` has elapsed and report it as
/// [`Error::ProviderTimeout`].
pub trait DistanceProvider: Sync {
    fn distances(
        &self,
        origins: &[GeoPoint],
        destinations: &[GeoPoint],
        timeout: Duration,
    ) -> Result<ProviderRows>;
}

impl<F: Fn(&[GeoPoint], &[GeoPoint], Duration) -> Result<ProviderRows> + Sync> DistanceProvider
    for F
{
    fn distances(
        &self,
        origins: &[GeoPoint],
        destinations: &[GeoPoint],
        timeout: Duration,
    ) -> Result<ProviderRows> {
        self(origins, destinations, timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    GreatCircle,
    External,
}

/// Symmetric, non-negative `n × n` matrix with a zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    data: Array2<f64>,
}

impl DistanceMatrix {
    /// Wraps an explicit matrix, checking that it is square, symmetric,
    /// non-negative and has a zero diagonal.
    pub fn from_array(data: Array2<f64>) -> Result<Self> {
        let (rows, cols) = data.dim();
        if rows != cols {
            return Err(Error::validation(format!(
                "distance matrix must be square, got {rows}x{cols}"
            )));
        }
        for i in 0..rows {
            if data[[i, i]] != 0.0 {
                return Err(Error::validation(format!(
                    "distance matrix diagonal must be zero at {i}"
                )));
            }
            for j in 0..i {
                let d = data[[i, j]];
                if d.is_nan() || d < 0.0 || d != data[[j, i]] {
                    return Err(Error::validation(format!(
                        "distance matrix entry ({i}, {j}) is negative or asymmetric"
                    )));
                }
            }
        }
        Ok(Self { data })
    }

    /// Haversine distances, in kilometers, between every pair of points.
    pub fn great_circle(points: &[GeoPoint]) -> Result<Self> {
        geo::validate(points)?;
        let n = points.len();
        let mut data = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..i {
                let d = haversine_distance(&points[i], &points[j]);
                data[[i, j]] = d;
                data[[j, i]] = d;
            }
        }
        Ok(Self { data })
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[[i, j]]
    }

    pub fn size(&self) -> usize {
        self.data.nrows()
    }

    pub fn view(&self) -> ArrayView2<f64> {
        self.data.view()
    }

    /// The sub-matrix over `indices`, in the given order.
    pub fn restrict(&self, indices: &[usize]) -> Self {
        let data = self
            .data
            .select(Axis(0), indices)
            .select(Axis(1), indices);
        Self { data }
    }
}

pub struct DistanceMatrixBuilder<'p> {
    provider: Option<&'p dyn DistanceProvider>,
    chunk_size: usize,
    timeout: Duration,
    threads: usize,
    max_unresolved_fraction: f64,
}

impl<'p> DistanceMatrixBuilder<'p> {
    pub fn great_circle() -> DistanceMatrixBuilder<'p> {
        Self {
            provider: None,
            chunk_size: 10,
            timeout: Duration::from_secs(10),
            threads: 1,
            max_unresolved_fraction: 0.5,
        }
    }

    pub fn external(provider: &'p dyn DistanceProvider) -> DistanceMatrixBuilder<'p> {
        Self {
            provider: Some(provider),
            ..Self::great_circle()
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        assert!(chunk_size >= 1);
        Self { chunk_size, ..self }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_threads(self, threads: usize) -> Self {
        assert!(threads >= 1);
        Self { threads, ..self }
    }

    pub fn with_max_unresolved_fraction(self, max_unresolved_fraction: f64) -> Self {
        Self {
            max_unresolved_fraction,
            ..self
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self.provider {
            Some(_) => Strategy::External,
            None => Strategy::GreatCircle,
        }
    }

    pub fn build(&self, points: &[GeoPoint]) -> Result<DistanceMatrix> {
        match self.provider {
            None => DistanceMatrix::great_circle(points),
            Some(provider) => self.build_external(provider, points),
        }
    }

    fn build_external(
        &self,
        provider: &dyn DistanceProvider,
        points: &[GeoPoint],
    ) -> Result<DistanceMatrix> {
        geo::validate(points)?;
        let n = points.len();
        let chunks: Vec<Range<usize>> = (0..n)
            .step_by(self.chunk_size)
            .map(|start| start..(start + self.chunk_size).min(n))
            .collect();
        let pairs: Vec<(usize, usize)> = (0..chunks.len())
            .flat_map(|o| (0..chunks.len()).map(move |d| (o, d)))
            .collect();

        let started = Instant::now();
        let timed_out = AtomicBool::new(false);
        let n_pairs = pairs.len();
        let threads = self.threads.min(n_pairs).max(1);
        let mut results: Vec<Option<Result<ProviderRows>>> = Vec::new();
        results.resize_with(n_pairs, || None);

        let call = |p: usize| -> Result<ProviderRows> {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() || timed_out.load(Ordering::Relaxed) {
                return Err(Error::ProviderTimeout(self.timeout));
            }
            let (o, d) = pairs[p];
            let rows = provider.distances(
                &points[chunks[o].clone()],
                &points[chunks[d].clone()],
                remaining,
            );
            // late answers count as timeouts
            if started.elapsed() > self.timeout || matches!(rows, Err(Error::ProviderTimeout(_))) {
                timed_out.store(true, Ordering::Relaxed);
                return Err(Error::ProviderTimeout(self.timeout));
            }
            rows
        };

        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for worker in 0..threads {
                let call = &call;
                let h = scope.spawn(move || {
                    (worker..n_pairs)
                        .step_by(threads)
                        .map(|p| (p, call(p)))
                        .collect::<Vec<_>>()
                });
                handles.push(h);
            }

            // reassemble by chunk-pair index, whatever the completion order
            for h in handles {
                let done = h
                    .join()
                    .map_err(|_| Error::unavailable("distance worker panicked"))?;
                for (p, rows) in done {
                    results[p] = Some(rows);
                }
            }
            Ok(())
        })?;

        let mut directed: Array2<Option<f64>> = Array2::from_elem((n, n), None);
        for (p, rows) in results.into_iter().enumerate() {
            let (o, d) = pairs[p];
            let (origins, destinations) = (chunks[o].clone(), chunks[d].clone());
            match rows {
                Some(Ok(rows)) if has_shape(&rows, origins.len(), destinations.len()) => {
                    for (i, row) in origins.zip(rows) {
                        for (j, cell) in destinations.clone().zip(row) {
                            directed[[i, j]] = cell.filter(|d| d.is_finite() && *d >= 0.0);
                        }
                    }
                }
                Some(Ok(_)) => {
                    log::warn!("provider returned a malformed batch for chunks ({o}, {d})");
                }
                Some(Err(Error::ProviderTimeout(_))) => {
                    log::warn!(
                        "distance provider exceeded {:?} on chunks ({o}, {d})",
                        self.timeout
                    );
                    return Err(Error::ProviderTimeout(self.timeout));
                }
                Some(Err(e)) => {
                    log::warn!("distance provider failed on chunks ({o}, {d}): {e}");
                }
                None => return Err(Error::unavailable("missing chunk result")),
            }
        }

        let mut data = Array2::zeros((n, n));
        let mut unresolved = 0usize;
        for i in 0..n {
            for j in 0..i {
                let d = match (directed[[i, j]], directed[[j, i]]) {
                    (Some(a), Some(b)) => (a + b) / 2.0,
                    (Some(a), None) | (None, Some(a)) => a,
                    (None, None) => {
                        unresolved += 1;
                        f64::INFINITY
                    }
                };
                data[[i, j]] = d;
                data[[j, i]] = d;
            }
        }

        let total = n * n.saturating_sub(1) / 2;
        if total > 0 {
            let fraction = unresolved as f64 / total as f64;
            if fraction > self.max_unresolved_fraction {
                return Err(Error::unavailable(format!(
                    "{unresolved} of {total} pairs could not be resolved"
                )));
            }
            if unresolved > 0 {
                log::warn!("{unresolved} of {total} pairs unreachable, treated as infinite");
            }
        }
        log::debug!(
            "assembled {n}x{n} matrix from {n_pairs} provider calls in {:?}",
            started.elapsed()
        );

        Ok(DistanceMatrix { data })
    }
}

fn has_shape(rows: &ProviderRows, origins: usize, destinations: usize) -> bool {
    rows.len() == origins && rows.iter().all(|row| row.len() == destinations)
}
