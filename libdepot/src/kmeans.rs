//! Size-constrained k-means: Lloyd iterations where the assignment step is
//! a minimum-cost flow honouring the per-group size bounds.

use ndarray::{prelude::*, Data};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::flow::min_cost_assignment;
use crate::metricdata::euclideandata::sq_eucl;
use crate::partition::Partition;

pub struct ConstrainedKMeans {
    k: usize,
    min_size: usize,
    max_size: usize,
    max_iterations: usize,
    n_init: usize,
    tolerance: f64,
    seed: u64,
}

#[derive(Debug, Clone)]
pub struct FittedPartition {
    assignment: Array1<usize>,
    centroids: Array2<f64>,
    inertia: f64,
    iterations: usize,
    effective_max: usize,
}

impl FittedPartition {
    /// Group index of every point, in `0..k`.
    pub fn assignment(&self) -> ArrayView1<usize> {
        self.assignment.view()
    }

    pub fn centroids(&self) -> ArrayView2<f64> {
        self.centroids.view()
    }

    /// Sum of squared distances of the points to their group centroid.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn num_groups(&self) -> usize {
        self.centroids.nrows()
    }

    /// The maximum group size actually enforced, after raising it to fit
    /// every point.
    pub fn effective_max(&self) -> usize {
        self.effective_max
    }

    pub fn to_partition(&self) -> Partition {
        Partition::from_assignment(&self.assignment.to_vec())
    }
}

impl ConstrainedKMeans {
    pub fn new(k: usize, min_size: usize, max_size: usize) -> Self {
        Self {
            k,
            min_size,
            max_size,
            max_iterations: 300,
            n_init: 10,
            tolerance: 1e-4,
            seed: 42,
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        assert!(max_iterations >= 1);
        Self {
            max_iterations,
            ..self
        }
    }

    pub fn with_n_init(self, n_init: usize) -> Self {
        assert!(n_init >= 1);
        Self { n_init, ..self }
    }

    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    pub fn fit<S: Data<Elem = f64>>(&self, data: &ArrayBase<S, Ix2>) -> Result<FittedPartition> {
        let n = data.nrows();
        if n == 0 {
            return Err(Error::validation("cannot partition an empty point set"));
        }
        if self.k == 0 {
            return Err(Error::validation("the number of groups must be positive"));
        }
        if self.min_size > self.max_size {
            return Err(Error::validation(format!(
                "minimum group size {} exceeds maximum {}",
                self.min_size, self.max_size
            )));
        }

        let k = if self.k > n {
            log::warn!(
                "{} groups requested for {n} points, using {n} groups",
                self.k
            );
            n
        } else {
            self.k
        };
        if self.min_size * k > n {
            return Err(Error::InfeasibleCapacity {
                min_size: self.min_size,
                drivers: k,
                points: n,
            });
        }
        let effective_max = self.max_size.max(n.div_ceil(k));
        if effective_max > self.max_size {
            log::warn!(
                "maximum group size raised from {} to {effective_max} to fit {n} points",
                self.max_size
            );
        }
        // empty groups are never produced
        let effective_min = self.min_size.max(1);

        let tolerance = self.tolerance * mean_variance(data);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best: Option<FittedPartition> = None;

        for run in 0..self.n_init {
            let centroids = kmeans_plus_plus(data, k, &mut rng);
            let fitted = self.lloyd(data, centroids, effective_min, effective_max, tolerance)?;
            log::debug!(
                "run {run}: inertia {:.6} after {} iterations",
                fitted.inertia,
                fitted.iterations
            );
            if best.as_ref().map_or(true, |b| fitted.inertia < b.inertia) {
                best = Some(fitted);
            }
        }

        best.ok_or_else(|| Error::validation("no initialisation was run"))
    }

    fn lloyd<S: Data<Elem = f64>>(
        &self,
        data: &ArrayBase<S, Ix2>,
        mut centroids: Array2<f64>,
        min_size: usize,
        max_size: usize,
        tolerance: f64,
    ) -> Result<FittedPartition> {
        let k = centroids.nrows();
        let mut assignment: Option<Array1<usize>> = None;
        let mut iterations = 0;

        for _ in 0..self.max_iterations {
            iterations += 1;

            let costs = cost_matrix(data, &centroids);
            let next = min_cost_assignment(&costs.view(), min_size, max_size)?;
            let updated = compute_centroids(data, &next, k);

            let shift: f64 = centroids
                .rows()
                .into_iter()
                .zip(updated.rows())
                .map(|(a, b)| sq_eucl(&a, &b))
                .sum();
            let stable = assignment.as_ref() == Some(&next);

            assignment = Some(next);
            centroids = updated;
            if stable || shift <= tolerance {
                break;
            }
        }

        let assignment = assignment.ok_or_else(|| Error::validation("no iteration was run"))?;
        let inertia = assignment
            .iter()
            .enumerate()
            .map(|(i, &c)| sq_eucl(&data.row(i), &centroids.row(c)))
            .sum();

        Ok(FittedPartition {
            assignment,
            centroids,
            inertia,
            iterations,
            effective_max: max_size,
        })
    }
}

fn cost_matrix<S: Data<Elem = f64>>(
    data: &ArrayBase<S, Ix2>,
    centroids: &Array2<f64>,
) -> Array2<f64> {
    let mut costs = Array2::zeros((data.nrows(), centroids.nrows()));
    for (i, point) in data.rows().into_iter().enumerate() {
        for (c, centroid) in centroids.rows().into_iter().enumerate() {
            costs[[i, c]] = sq_eucl(&point, &centroid);
        }
    }
    costs
}

fn compute_centroids<S: Data<Elem = f64>>(
    data: &ArrayBase<S, Ix2>,
    assignment: &Array1<usize>,
    k: usize,
) -> Array2<f64> {
    let mut sums = Array2::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];
    for (point, &c) in data.rows().into_iter().zip(assignment.iter()) {
        let mut row = sums.row_mut(c);
        row += &point;
        counts[c] += 1;
    }
    for (mut row, &count) in sums.rows_mut().into_iter().zip(counts.iter()) {
        if count > 0 {
            row /= count as f64;
        }
    }
    sums
}

fn mean_variance<S: Data<Elem = f64>>(data: &ArrayBase<S, Ix2>) -> f64 {
    data.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

/// k-means++ seeding: the first center uniformly at random, each next one
/// with probability proportional to its squared distance from the closest
/// center chosen so far.
fn kmeans_plus_plus<S: Data<Elem = f64>>(
    data: &ArrayBase<S, Ix2>,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Array2<f64> {
    let n = data.nrows();
    let mut centers = Vec::with_capacity(k);
    centers.push(rng.gen_range(0..n));

    let mut closest: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|row| sq_eucl(&row, &data.row(centers[0])))
        .collect();

    while centers.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in closest.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // all remaining points coincide with a center
            rng.gen_range(0..n)
        };
        centers.push(next);
        for (i, row) in data.rows().into_iter().enumerate() {
            closest[i] = closest[i].min(sq_eucl(&row, &data.row(next)));
        }
    }

    data.select(Axis(0), &centers)
}
