use crate::distance::DistanceMatrix;
use crate::metricdata::{MetricData, Subset};

impl MetricData for DistanceMatrix {
    fn distance(&self, i: usize, j: usize) -> f64 {
        self.get(i, j)
    }

    // symmetric, so column `j` is row `j`
    fn all_distances(&self, j: usize, out: &mut [f64]) {
        assert_eq!(out.len(), self.size());
        for (oo, &d) in out.iter_mut().zip(self.view().row(j)) {
            *oo = d;
        }
    }

    fn num_points(&self) -> usize {
        self.size()
    }
}

impl Subset for DistanceMatrix {
    type Out = DistanceMatrix;
    fn subset<I: IntoIterator<Item = usize>>(&self, indices: I) -> Self::Out {
        let indices: Vec<usize> = indices.into_iter().collect();
        self.restrict(&indices)
    }
}
