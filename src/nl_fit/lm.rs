use crate::error::ConvergenceError;
use crate::nl_fit::bounds::clamp;
use crate::nl_fit::constants::{RELATIVE_STEP, REJECTED_RESIDUAL};
use crate::nl_fit::curve_fit::{CurveFitProblem, CurveFitResult, CurveFitTrait};
use crate::nl_fit::linalg::{spd_inverse, to_array1, to_array2, to_dvector};

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Dyn, Owned};
use ndarray::{Array1, ArrayView1};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

const NAME: &str = "levenberg_marquardt";

/// Levenberg-Marquardt non-linear least-squares solver
///
/// The MINPACK trust-region variant of the `levenberg-marquardt` crate run on the weighted
/// residuals with a forward-difference Jacobian. Bounds are honoured by projecting every trial
/// point into `[lower, upper]`. The covariance is `(J^T J)^-1` with absolute errors and the
/// reported errors are symmetric.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "LevenbergMarquardt")]
pub struct LmCurveFit {
    pub niterations: u32,
    pub xtol: f64,
    pub stepbound: f64,
}

impl LmCurveFit {
    /// Create a new [LmCurveFit].
    ///
    /// # Arguments
    /// - `niterations`: the fit gives up after `niterations * (nfree + 1)` evaluations of the
    ///   residuals
    /// - `xtol`: relative size of the trust region which stops the iterations
    /// - `stepbound`: initial trust region radius relative to the scaled initial guess
    pub fn new(niterations: u32, xtol: f64, stepbound: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(xtol > 0.0, "xtol must be positive");
        assert!(stepbound > 0.0, "stepbound must be positive");
        Self {
            niterations,
            xtol,
            stepbound,
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        1000
    }

    #[inline]
    pub fn default_xtol() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_stepbound() -> f64 {
        100.0
    }
}

impl Default for LmCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_xtol(),
            Self::default_stepbound(),
        )
    }
}

impl CurveFitTrait for LmCurveFit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn curve_fit(&self, problem: &CurveFitProblem<'_>) -> Result<CurveFitResult, ConvergenceError> {
        let mut x0 = problem.x0.clone();
        clamp(&mut x0, problem.lower.view(), problem.upper.view());
        let r0 = problem.trial_residuals(NAME, x0.view())?.ok_or_else(|| {
            ConvergenceError::new(NAME, "model is not finite at the initial guess")
        })?;
        let residuals = ProjectedResiduals {
            problem,
            x: x0,
            nresiduals: r0.len(),
            failure: RefCell::new(None),
        };

        let (residuals, report) = LevenbergMarquardt::new()
            .with_xtol(self.xtol)
            .with_stepbound(self.stepbound)
            .with_patience(self.niterations as usize)
            .minimize(residuals);
        if let Some(err) = residuals.failure.into_inner() {
            return Err(err);
        }
        let niterations = report.number_of_evaluations;
        match report.termination {
            reason if reason.was_successful() => {
                debug!("{NAME} converged after {niterations} evaluations: {reason:?}")
            }
            // tolerances are below the machine precision, the minimum is as good as it gets
            TerminationReason::NoImprovementPossible(tolerance) => {
                debug!("{NAME} stopped after {niterations} evaluations at {tolerance} precision")
            }
            TerminationReason::LostPatience => {
                warn!(
                    "{NAME} stopped after {niterations} evaluations with chi2 = {}",
                    2.0 * report.objective_function
                );
                return Err(ConvergenceError::new(
                    NAME,
                    format!("maximum number of iterations ({}) is reached", self.niterations),
                ));
            }
            reason => {
                return Err(ConvergenceError::new(
                    NAME,
                    format!("minimization failed: {reason:?}"),
                ));
            }
        }

        let x = residuals.x;
        let r = problem
            .trial_residuals(NAME, x.view())?
            .ok_or_else(|| ConvergenceError::new(NAME, "model is not finite at the minimum"))?;
        let jac = forward_jacobian(problem, x.view(), &r)?;
        let covariance = spd_inverse(jac.tr_mul(&jac)).ok_or_else(|| {
            ConvergenceError::new(NAME, "covariance matrix is singular or not positive definite")
        })?;
        let covariance = to_array2(&covariance);
        let err = covariance.diag().mapv(f64::sqrt);

        Ok(CurveFitResult {
            x,
            err_low: err.clone(),
            err_high: err,
            covariance,
            chi2: r.dot(&r),
            niterations,
        })
    }
}

/// Weighted residuals with every parameter update projected into the bounds
///
/// Failures which must abort the fit are kept in `failure`, the solver only sees a missing
/// residual vector or Jacobian.
struct ProjectedResiduals<'p, 'a> {
    problem: &'p CurveFitProblem<'a>,
    x: Array1<f64>,
    nresiduals: usize,
    failure: RefCell<Option<ConvergenceError>>,
}

impl ProjectedResiduals<'_, '_> {
    fn fail<T>(&self, err: ConvergenceError) -> Option<T> {
        self.failure.borrow_mut().get_or_insert(err);
        None
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ProjectedResiduals<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x = to_array1(x);
        clamp(&mut self.x, self.problem.lower.view(), self.problem.upper.view());
    }

    fn params(&self) -> DVector<f64> {
        to_dvector(self.x.view())
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        match self.problem.trial_residuals(NAME, self.x.view()) {
            Ok(Some(r)) => Some(to_dvector(r.view())),
            Ok(None) => Some(DVector::from_element(self.nresiduals, REJECTED_RESIDUAL)),
            Err(err) => self.fail(err),
        }
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let r = match self.problem.trial_residuals(NAME, self.x.view()) {
            Ok(Some(r)) => r,
            Ok(None) => {
                return self.fail(ConvergenceError::new(
                    NAME,
                    "model is not finite where the Jacobian is needed",
                ));
            }
            Err(err) => return self.fail(err),
        };
        match forward_jacobian(self.problem, self.x.view(), &r) {
            Ok(jac) => Some(jac),
            Err(err) => self.fail(err),
        }
    }
}

/// Forward-difference Jacobian of the weighted residuals, stepping away from the upper bound
fn forward_jacobian(
    problem: &CurveFitProblem<'_>,
    x: ArrayView1<f64>,
    r: &Array1<f64>,
) -> Result<DMatrix<f64>, ConvergenceError> {
    let mut jac = DMatrix::zeros(r.len(), x.len());
    for k in 0..x.len() {
        let h = RELATIVE_STEP * x[k].abs().max(1.0);
        let h = if x[k] + h > problem.upper[k] { -h } else { h };
        let mut shifted = x.to_owned();
        shifted[k] += h;
        let r_shifted = problem.trial_residuals(NAME, shifted.view())?.ok_or_else(|| {
            ConvergenceError::new(
                NAME,
                format!("model is not finite while differentiating by free parameter {k}"),
            )
        })?;
        let h = shifted[k] - x[k];
        for (row, (&a, &b)) in r_shifted.iter().zip(r.iter()).enumerate() {
            jac[(row, k)] = (a - b) / h;
        }
    }
    Ok(jac)
}
