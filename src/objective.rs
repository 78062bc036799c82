use crate::data::Dataset;
use crate::error::{ConfigurationError, DataError, GlobalFitError};
use crate::model::Model;
use crate::params::{Link, LinkTable};

use ndarray::{Array1, Array2, ArrayView1};

/// Step in `x` used for the numerical slope of the model, `f'(x)`
pub const X_DERIVATIVE_STEP: f64 = 1e-6;

/// Model evaluation failure, attributed to the dataset which produced it
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("dataset {dataset}: model returned {actual} values for {expected} points")]
    OutputLength {
        dataset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("dataset {dataset}: model value is not finite")]
    NonFinite { dataset: usize },
}

impl ObjectiveError {
    pub fn dataset(&self) -> usize {
        match self {
            Self::OutputLength { dataset, .. } | Self::NonFinite { dataset } => *dataset,
        }
    }
}

impl From<ObjectiveError> for GlobalFitError {
    fn from(value: ObjectiveError) -> Self {
        match value {
            ObjectiveError::OutputLength {
                dataset,
                expected,
                actual,
            } => ConfigurationError::ModelOutputLength {
                dataset,
                expected,
                actual,
            }
            .into(),
            ObjectiveError::NonFinite { dataset } => DataError::NonFiniteModel { dataset }.into(),
        }
    }
}

/// Concatenated model of all datasets as a function of the reduced free-parameter vector
///
/// Everything the evaluation needs is held here as plain data: the link table, the dense matrix
/// the fixed constants are read from, the datasets (for `x` and metadata) and their models.
#[derive(Clone, Debug)]
pub struct GlobalObjective<'a> {
    links: &'a LinkTable,
    fixed_values: Array2<f64>,
    datasets: &'a [Dataset],
    models: &'a [Model],
}

impl<'a> GlobalObjective<'a> {
    pub fn new(
        links: &'a LinkTable,
        fixed_values: Array2<f64>,
        datasets: &'a [Dataset],
        models: &'a [Model],
    ) -> Self {
        assert_eq!(links.nsets(), datasets.len());
        assert_eq!(links.nsets(), models.len());
        assert_eq!(fixed_values.dim(), (links.nsets(), links.npar()));
        Self {
            links,
            fixed_values,
            datasets,
            models,
        }
    }

    #[inline]
    pub fn nfree(&self) -> usize {
        self.links.nfree()
    }

    #[inline]
    pub fn nsets(&self) -> usize {
        self.datasets.len()
    }

    pub fn links(&self) -> &LinkTable {
        self.links
    }

    pub fn datasets(&self) -> &[Dataset] {
        self.datasets
    }

    /// Dense matrix the fixed constants are taken from
    pub fn fixed_values(&self) -> &Array2<f64> {
        &self.fixed_values
    }

    /// Full parameter vector of dataset `i`
    pub fn params_of(&self, i: usize, free: ArrayView1<f64>) -> Vec<f64> {
        let npar = self.links.npar();
        self.links
            .row(i)
            .map(|link| match link {
                Link::Free(f) => free[f],
                Link::Fixed(k) => self.fixed_values[[k / npar, k % npar]],
            })
            .collect()
    }

    /// Model of dataset `i` at arbitrary `x`
    pub fn eval_at(
        &self,
        i: usize,
        x: ArrayView1<f64>,
        params: &[f64],
    ) -> Result<Array1<f64>, ObjectiveError> {
        let y = self.models[i].eval(x, params, &self.datasets[i].metadata);
        if y.len() != x.len() {
            return Err(ObjectiveError::OutputLength {
                dataset: i,
                expected: x.len(),
                actual: y.len(),
            });
        }
        if !y.iter().all(|v| v.is_finite()) {
            return Err(ObjectiveError::NonFinite { dataset: i });
        }
        Ok(y)
    }

    /// Model of dataset `i` at its own `x`
    pub fn eval_dataset(&self, i: usize, params: &[f64]) -> Result<Array1<f64>, ObjectiveError> {
        self.eval_at(i, self.datasets[i].x.view(), params)
    }

    /// Central-difference slope `df/dx` of dataset `i` at its own `x`
    pub fn slope_dataset(&self, i: usize, params: &[f64]) -> Result<Array1<f64>, ObjectiveError> {
        let x = &self.datasets[i].x;
        let upper = self.eval_at(i, (x + X_DERIVATIVE_STEP).view(), params)?;
        let lower = self.eval_at(i, (x - X_DERIVATIVE_STEP).view(), params)?;
        Ok((upper - lower) / (2.0 * X_DERIVATIVE_STEP))
    }

    /// All models evaluated in dataset order, aligned with the concatenated observations
    pub fn eval(&self, free: ArrayView1<f64>) -> Result<Array1<f64>, ObjectiveError> {
        let mut output = Vec::with_capacity(self.datasets.iter().map(Dataset::len).sum());
        for i in 0..self.nsets() {
            let params = self.params_of(i, free);
            output.extend(self.eval_dataset(i, &params)?.iter().copied());
        }
        Ok(output.into())
    }
}
