use crate::error::{DataError, GlobalFitError};
use crate::nl_fit::LeastSquares;
use crate::params::ParameterSpec;

use ndarray::{Array1, Array2, ArrayView1};

/// Reduced chi-squared of the whole fit and of every dataset
///
/// The global value is divided by `N_total - nfree`. A dataset's value is divided by its own
/// `N_i - nvaried_i`, where parameters shared with other datasets still count as varied.
#[derive(Clone, Copy, Debug)]
pub struct ChiSquaredEvaluator<'c, 'a> {
    cost: &'c LeastSquares<'a>,
    spec: &'c ParameterSpec,
}

impl<'c, 'a> ChiSquaredEvaluator<'c, 'a> {
    pub fn new(cost: &'c LeastSquares<'a>, spec: &'c ParameterSpec) -> Self {
        assert_eq!(cost.objective().nsets(), spec.nsets());
        Self { cost, spec }
    }

    pub fn global_dof(&self) -> Result<usize, DataError> {
        let (npoints, nfree) = (self.cost.npoints(), self.cost.nfree());
        npoints
            .checked_sub(nfree)
            .filter(|&dof| dof > 0)
            .ok_or(DataError::GlobalDof { npoints, nfree })
    }

    pub fn dataset_dof(&self, i: usize) -> Result<usize, DataError> {
        let npoints = self.cost.objective().datasets()[i].len();
        let nvaried = self.spec.nvaried(i);
        npoints
            .checked_sub(nvaried)
            .filter(|&dof| dof > 0)
            .ok_or(DataError::DatasetDof {
                dataset: i,
                npoints,
                nvaried,
            })
    }

    /// Every degrees-of-freedom count is positive
    pub fn check_dof(&self) -> Result<(), DataError> {
        self.global_dof()?;
        (0..self.spec.nsets()).try_for_each(|i| self.dataset_dof(i).map(|_| ()))
    }

    /// Global reduced chi-squared at the free-parameter vector `par`
    pub fn global(&self, par: ArrayView1<f64>) -> Result<f64, GlobalFitError> {
        let dof = self.global_dof()?;
        Ok(self.cost.chi2(par)? / dof as f64)
    }

    /// Reduced chi-squared of dataset `i` at its full parameter vector
    pub fn dataset(&self, i: usize, params: &[f64]) -> Result<f64, GlobalFitError> {
        let dof = self.dataset_dof(i)?;
        Ok(self.cost.dataset_chi2(i, params)? / dof as f64)
    }

    /// Global and per-dataset values
    pub fn evaluate(
        &self,
        par: ArrayView1<f64>,
        par_runwise: &Array2<f64>,
    ) -> Result<(f64, Array1<f64>), GlobalFitError> {
        let global = self.global(par)?;
        let per_dataset = par_runwise
            .outer_iter()
            .enumerate()
            .map(|(i, params)| self.dataset(i, &params.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((global, per_dataset.into()))
    }
}
