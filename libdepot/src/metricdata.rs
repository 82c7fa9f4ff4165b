//! Point sets the partitioner and the outlier filter can measure: projected
//! coordinates ([`EuclideanData`]) or a precomputed [`DistanceMatrix`].
//!
//! [`DistanceMatrix`]: crate::distance::DistanceMatrix

pub mod euclideandata;
pub mod precomputed;

pub trait MetricData {
    /// Distance between points `i` and `j`. May be `f64::INFINITY` for a
    /// pair that cannot be travelled.
    fn distance(&self, i: usize, j: usize) -> f64;

    /// Fills `out[i]` with the distance from every point `i` to `j`.
    fn all_distances(&self, j: usize, out: &mut [f64]) {
        assert_eq!(out.len(), self.num_points());
        for (i, oo) in out.iter_mut().enumerate() {
            *oo = self.distance(i, j);
        }
    }

    fn num_points(&self) -> usize;
}

/// Restriction of a point set to some of its points, renumbered `0..` in
/// the order the indices are given.
pub trait Subset {
    type Out: MetricData;
    fn subset<I: IntoIterator<Item = usize>>(&self, indices: I) -> Self::Out;
}

pub use self::euclideandata::EuclideanData;
