use crate::error::{ConfigurationError, ConvergenceError};
use crate::nl_fit::constants::REJECTED_CHI2;
use crate::nl_fit::least_squares::LeastSquares;
use crate::nl_fit::lm::LmCurveFit;
use crate::nl_fit::migrad::MigradCurveFit;
use crate::objective::ObjectiveError;

use enum_dispatch::enum_dispatch;
use ndarray::{Array1, Array2, ArrayView1};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::str::FromStr;

/// Everything a backend needs: the cost and the flattened initial guess and bounds
#[derive(Clone, Debug)]
pub struct CurveFitProblem<'a> {
    pub cost: LeastSquares<'a>,
    pub x0: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl CurveFitProblem<'_> {
    #[inline]
    pub fn nfree(&self) -> usize {
        self.x0.len()
    }

    /// Weighted residuals at a trial point, `None` if they are not finite there
    pub(super) fn trial_residuals(
        &self,
        backend: &'static str,
        x: ArrayView1<f64>,
    ) -> Result<Option<Array1<f64>>, ConvergenceError> {
        match self.cost.residuals(x) {
            Ok(r) if r.iter().all(|v| v.is_finite()) => Ok(Some(r)),
            Ok(_) | Err(ObjectiveError::NonFinite { .. }) => Ok(None),
            Err(e) => Err(objective_failure(backend, e)),
        }
    }

    /// Chi-squared at a trial point, infinite if the model is not finite there
    pub(super) fn trial_chi2(
        &self,
        backend: &'static str,
        x: ArrayView1<f64>,
    ) -> Result<f64, ConvergenceError> {
        Ok(self
            .trial_residuals(backend, x)?
            .map_or(REJECTED_CHI2, |r| r.dot(&r)))
    }
}

pub(super) fn objective_failure(backend: &'static str, e: ObjectiveError) -> ConvergenceError {
    let dataset = e.dataset();
    ConvergenceError::new(backend, e.to_string()).with_dataset(Some(dataset))
}

/// Raw output of a backend in the reduced free-parameter space
///
/// `err_low` and `err_high` are non-negative magnitudes, equal for symmetric errors.
#[derive(Clone, Debug)]
pub struct CurveFitResult {
    pub x: Array1<f64>,
    pub err_low: Array1<f64>,
    pub err_high: Array1<f64>,
    pub covariance: Array2<f64>,
    pub chi2: f64,
    pub niterations: usize,
}

#[enum_dispatch]
pub trait CurveFitTrait: Clone + Debug + Serialize + DeserializeOwned {
    /// Stable backend name used in diagnostics
    fn name(&self) -> &'static str;

    fn curve_fit(&self, problem: &CurveFitProblem<'_>) -> Result<CurveFitResult, ConvergenceError>;
}

/// Optimization algorithm for non-linear least squares
#[enum_dispatch(CurveFitTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[non_exhaustive]
pub enum CurveFitAlgorithm {
    LevenbergMarquardt(LmCurveFit),
    Migrad(MigradCurveFit),
}

impl CurveFitAlgorithm {
    /// Backend by name with its default configuration
    ///
    /// `"curve_fit"`, `"lm"` and `"levenberg_marquardt"` select [LmCurveFit], `"migrad"` and
    /// `"minuit"` select [MigradCurveFit]. Matching is case-insensitive.
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        match name.to_ascii_lowercase().as_str() {
            "curve_fit" | "lm" | "levenberg_marquardt" => Ok(LmCurveFit::default().into()),
            "migrad" | "minuit" => Ok(MigradCurveFit::default().into()),
            _ => Err(ConfigurationError::UnknownMinimizer(name.to_owned())),
        }
    }
}

impl Default for CurveFitAlgorithm {
    fn default() -> Self {
        MigradCurveFit::default().into()
    }
}

impl FromStr for CurveFitAlgorithm {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
