use ndarray::{prelude::*, Data, OwnedRepr};

use crate::metricdata::{MetricData, Subset};

/// Points in a Euclidean feature space, one per row.
pub struct EuclideanData<S: Data<Elem = f64>> {
    data: ArrayBase<S, Ix2>,
}

impl<S: Data<Elem = f64>> EuclideanData<S> {
    pub fn new(data: ArrayBase<S, Ix2>) -> Self {
        Self { data }
    }

    pub fn points(&self) -> ArrayView2<f64> {
        self.data.view()
    }
}

// Projected coordinates are large (Earth radius) and close together, so
// the squared-norm expansion would cancel catastrophically. Differences
// are taken coordinate by coordinate instead.
pub fn sq_eucl<A, B>(a: &ArrayBase<A, Ix1>, b: &ArrayBase<B, Ix1>) -> f64
where
    A: Data<Elem = f64>,
    B: Data<Elem = f64>,
{
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl<S: Data<Elem = f64>> MetricData for EuclideanData<S> {
    fn distance(&self, i: usize, j: usize) -> f64 {
        sq_eucl(&self.data.row(i), &self.data.row(j)).sqrt()
    }

    fn num_points(&self) -> usize {
        self.data.nrows()
    }
}

impl<S: Data<Elem = f64>> Subset for EuclideanData<S> {
    type Out = EuclideanData<OwnedRepr<f64>>;
    fn subset<I: IntoIterator<Item = usize>>(&self, indices: I) -> Self::Out {
        let indices: Vec<usize> = indices.into_iter().collect();
        EuclideanData::new(self.data.select(Axis(0), &indices))
    }
}
