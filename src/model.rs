use ndarray::{Array1, ArrayView1};
use std::fmt;
use std::sync::Arc;

/// Model function `f(x, params, metadata) -> y` evaluated over a whole dataset
///
/// `params` always holds the full per-dataset parameter vector (`npar` values, fixed ones
/// included), `metadata` holds the dataset's constant covariates. Implementations must be pure:
/// the fitter calls them many times with the same arguments and expects the same result.
pub trait ModelFunction: Send + Sync {
    fn eval(&self, x: ArrayView1<f64>, params: &[f64], metadata: &[f64]) -> Array1<f64>;
}

impl<F> ModelFunction for F
where
    F: Fn(ArrayView1<f64>, &[f64], &[f64]) -> Array1<f64> + Send + Sync,
{
    #[inline]
    fn eval(&self, x: ArrayView1<f64>, params: &[f64], metadata: &[f64]) -> Array1<f64> {
        self(x, params, metadata)
    }
}

/// Shared handle to a [ModelFunction]
#[derive(Clone)]
pub struct Model(Arc<dyn ModelFunction>);

impl Model {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ArrayView1<f64>, &[f64], &[f64]) -> Array1<f64> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap a type implementing [ModelFunction] directly
    pub fn from_function<M>(m: M) -> Self
    where
        M: ModelFunction + 'static,
    {
        Self(Arc::new(m))
    }

    /// Model applied point by point, for functions written for a scalar `x`
    pub fn pointwise<F>(f: F) -> Self
    where
        F: Fn(f64, &[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        Self::new(move |x: ArrayView1<f64>, params: &[f64], metadata: &[f64]| {
            x.mapv(|x| f(x, params, metadata))
        })
    }

    #[inline]
    pub fn eval(&self, x: ArrayView1<f64>, params: &[f64], metadata: &[f64]) -> Array1<f64> {
        self.0.eval(x, params, metadata)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Model(..)")
    }
}

/// One model for every dataset or one model per dataset
#[derive(Clone, Debug)]
pub enum Models {
    Single(Model),
    PerDataset(Vec<Model>),
}

impl Models {
    /// Number of models if given per dataset
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::Single(_) => None,
            Self::PerDataset(v) => Some(v.len()),
        }
    }

    pub(crate) fn broadcast(self, nsets: usize) -> Vec<Model> {
        match self {
            Self::Single(m) => vec![m; nsets],
            Self::PerDataset(v) => v,
        }
    }
}

impl From<Model> for Models {
    fn from(value: Model) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<Model>> for Models {
    fn from(value: Vec<Model>) -> Self {
        Self::PerDataset(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    #[test]
    fn closure_and_pointwise_agree() {
        let vectorised = Model::new(|x: ArrayView1<f64>, p: &[f64], _md: &[f64]| {
            x.mapv(|x| p[0] + p[1] * x)
        });
        let scalar = Model::pointwise(|x, p, _md| p[0] + p[1] * x);
        let x = array![0.0, 1.0, 2.0];
        let params = [1.0, 2.0];
        assert_eq!(vectorised.eval(x.view(), &params, &[]), array![1.0, 3.0, 5.0]);
        assert_eq!(
            vectorised.eval(x.view(), &params, &[]),
            scalar.eval(x.view(), &params, &[])
        );
    }

    struct Quadratic;

    impl ModelFunction for Quadratic {
        fn eval(&self, x: ArrayView1<f64>, p: &[f64], _metadata: &[f64]) -> Array1<f64> {
            x.mapv(|x| p[0] * x * x)
        }
    }

    #[test]
    fn model_function_type_is_wrapped() {
        let model = Model::from_function(Quadratic);
        assert_eq!(
            model.eval(array![1.0, 2.0, 3.0].view(), &[2.0], &[]),
            array![2.0, 8.0, 18.0]
        );
    }

    #[test]
    fn metadata_is_passed_through() {
        let model = Model::pointwise(|x, p, md| p[0] * x * md[0]);
        assert_eq!(
            model.eval(array![1.0, 2.0].view(), &[3.0], &[10.0]),
            array![30.0, 60.0]
        );
    }

    #[test]
    fn single_model_broadcasts() {
        let models: Models = Model::pointwise(|x, _, _| x).into();
        assert_eq!(models.count(), None);
        assert_eq!(models.broadcast(3).len(), 3);
    }
}
