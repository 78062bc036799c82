use crate::error::ConvergenceError;
use crate::nl_fit::bounds::{Transform, within_bounds};
use crate::nl_fit::constants::ERROR_DEF;
use crate::nl_fit::curve_fit::{CurveFitProblem, CurveFitResult, CurveFitTrait};
use crate::nl_fit::linalg::{spd_inverse, to_array2};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::BacktrackingLineSearch;
use argmin::solver::linesearch::condition::ArmijoCondition;
use argmin::solver::quasinewton::BFGS;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

const NAME: &str = "migrad";

/// Minimization stops when the estimated distance to minimum is below `EDM_FACTOR * tolerance`
const EDM_FACTOR: f64 = 0.002;
/// BFGS runs restarted from a diagonal metric when the distance to minimum is still too large
const MAX_RESTARTS: usize = 3;
/// `2 sqrt(eps)`, relative precision of the numerical derivatives
const EPS2: f64 = 2.9802322387695312e-8;
const INITIAL_STEP: f64 = 1e-3;
const GRADIENT_PASSES: usize = 3;
const ARMIJO: f64 = 1e-4;
const BACKTRACKING_RHO: f64 = 0.5;
/// Chi-squared change aimed at by the steps of the second derivatives
const HESSE_DELTA_CHI2: f64 = 0.1 * ERROR_DEF;
const HESSE_PASSES: usize = 3;
const MINOS_MAX_BRACKETS: usize = 10;
const MINOS_MAX_ITERATIONS: usize = 50;
const MINOS_TOLERANCE: f64 = 1e-3 * ERROR_DEF;

/// Quasi-Newton chi-squared minimizer in the manner of MINUIT's MIGRAD
///
/// Bounded parameters are mapped to unbounded internal ones (`sin` for double bounds, `sqrt`
/// for single ones) and minimized by `argmin`'s BFGS with a backtracking Armijo line search and
/// a numerical gradient. The inverse Hessian starts from the diagonal second derivatives and is
/// reset to them whenever a run stops short of the minimum. The covariance is `2 H^-1` of a
/// numerical Hessian at the minimum (HESSE). If `minos` is set, asymmetric errors are found where
/// the profile chi-squared crosses `chi2_min + 1`, otherwise both errors are
/// `sqrt(diag(covariance))`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Migrad")]
pub struct MigradCurveFit {
    pub niterations: u32,
    pub tolerance: f64,
    pub minos: bool,
}

impl MigradCurveFit {
    /// Create a new [MigradCurveFit].
    ///
    /// # Arguments
    /// - `niterations`: maximum number of BFGS iterations, summed over restarts
    /// - `tolerance`: a BFGS run stops once an iteration lowers chi-squared by less than
    ///   `0.002 * tolerance`, the minimum is accepted when the estimated distance to it is below
    ///   the same value
    /// - `minos`: compute asymmetric errors from the profile chi-squared
    pub fn new(niterations: u32, tolerance: f64, minos: bool) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(tolerance > 0.0, "tolerance must be positive");
        Self {
            niterations,
            tolerance,
            minos,
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        1000
    }

    #[inline]
    pub fn default_tolerance() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_minos() -> bool {
        true
    }

    fn edm_goal(&self) -> f64 {
        EDM_FACTOR * self.tolerance * ERROR_DEF
    }

    /// Central-difference gradient and diagonal second derivatives in internal space
    ///
    /// `steps` are tuned in place so that every step changes chi-squared by a few units of its
    /// rounding error.
    fn gradient(
        &self,
        chi2: &Chi2<'_, '_>,
        u: &DVector<f64>,
        fval: f64,
        steps: &mut DVector<f64>,
        passes: usize,
    ) -> Result<(DVector<f64>, DVector<f64>), ConvergenceError> {
        let n = u.len();
        let dfmin = 8.0 * EPS2 * (fval.abs() + ERROR_DEF);
        let mut g = DVector::zeros(n);
        let mut g2 = DVector::zeros(n);
        for k in 0..n {
            for _ in 0..passes {
                let h = steps[k];
                let fp = chi2.eval(&shifted(u, k, h))?;
                let fm = chi2.eval(&shifted(u, k, -h))?;
                (g[k], g2[k]) = match (fp.is_finite(), fm.is_finite()) {
                    (true, true) => ((fp - fm) / (2.0 * h), (fp + fm - 2.0 * fval) / (h * h)),
                    (true, false) => ((fp - fval) / h, 0.0),
                    (false, true) => ((fval - fm) / h, 0.0),
                    (false, false) => {
                        return Err(ConvergenceError::new(
                            NAME,
                            format!("chi-squared is not finite around internal parameter {k}"),
                        ));
                    }
                };
                if g2[k] <= 0.0 || !g2[k].is_finite() {
                    break;
                }
                let optimal = f64::sqrt(dfmin / g2[k]).max(8.0 * EPS2 * u[k].abs());
                steps[k] = optimal;
                if (0.5..2.0).contains(&(optimal / h)) {
                    break;
                }
            }
        }
        Ok((g, g2))
    }

    fn solver(&self) -> Result<Bfgs, argmin::core::Error> {
        let linesearch =
            BacktrackingLineSearch::new(ArmijoCondition::new(ARMIJO)?).rho(BACKTRACKING_RHO)?;
        BFGS::new(linesearch)
            .with_tolerance_grad(self.edm_goal())?
            .with_tolerance_cost(self.edm_goal())
    }

    /// Single BFGS run from `u0` with the inverse Hessian `1 / g2`
    fn run_bfgs(
        &self,
        chi2: &Chi2<'_, '_>,
        start: Start,
        steps: &RefCell<DVector<f64>>,
        max_iters: usize,
    ) -> Result<Minimum, ConvergenceError> {
        let Start { u, fval, g, g2 } = start;
        let n = u.len();
        let metric: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| if i == j { diagonal_step(g2[i]) } else { 0.0 }).collect())
            .collect();
        let problem = InternalChi2 {
            migrad: self,
            chi2,
            steps,
        };
        let result = Executor::new(problem, self.solver().map_err(argmin_failure)?)
            .configure(|state| {
                state
                    .param(u.as_slice().to_vec())
                    .cost(fval)
                    .gradient(g.as_slice().to_vec())
                    .inv_hessian(metric)
                    .max_iters(max_iters as u64)
            })
            .run()
            .map_err(argmin_failure)?;

        let state = result.state();
        let u = state.get_best_param().ok_or_else(|| {
            ConvergenceError::new(NAME, "BFGS finished without a parameter vector")
        })?;
        Ok(Minimum {
            u: DVector::from_column_slice(u),
            fval: state.get_best_cost(),
            edm: f64::NAN,
            niterations: state.get_iter() as usize,
            converged: matches!(
                state.get_termination_reason(),
                Some(TerminationReason::SolverConverged)
            ),
        })
    }

    /// BFGS runs from `u0` until the estimated distance to minimum meets the goal
    fn minimize(
        &self,
        chi2: &Chi2<'_, '_>,
        u0: DVector<f64>,
    ) -> Result<Minimum, ConvergenceError> {
        let fval = chi2.eval(&u0)?;
        if !fval.is_finite() {
            return Err(ConvergenceError::new(
                NAME,
                "chi-squared is not finite at the starting point",
            ));
        }
        // every parameter is held
        if u0.is_empty() {
            return Ok(Minimum {
                u: u0,
                fval,
                edm: 0.0,
                niterations: 0,
                converged: true,
            });
        }
        let steps = RefCell::new(u0.map(|u| INITIAL_STEP * u.abs().max(1.0)));
        let (g, g2) = self.gradient(chi2, &u0, fval, &mut steps.borrow_mut(), GRADIENT_PASSES)?;
        let mut start = Start {
            u: u0,
            fval,
            g,
            g2,
        };
        let mut niterations = 0;
        for _ in 0..=MAX_RESTARTS {
            let remaining = (self.niterations as usize).saturating_sub(niterations);
            if remaining == 0 {
                break;
            }
            let mut minimum = self.run_bfgs(chi2, start.clone(), &steps, remaining)?;
            niterations += minimum.niterations;
            minimum.niterations = niterations;
            if !minimum.converged {
                return Ok(minimum);
            }
            let improved = minimum.fval < start.fval;
            let (g, g2) = self.gradient(
                chi2,
                &minimum.u,
                minimum.fval,
                &mut steps.borrow_mut(),
                GRADIENT_PASSES,
            )?;
            minimum.edm = 0.5 * g.zip_map(&g2, |g, g2| g * g * diagonal_step(g2)).sum();
            // a run which does not lower chi-squared at all sits at its rounding level
            if minimum.edm < self.edm_goal() || !improved {
                return Ok(minimum);
            }
            debug!(
                "{NAME}: edm = {:e} after {niterations} iterations, restarting BFGS",
                minimum.edm
            );
            start = Start {
                u: minimum.u,
                fval: minimum.fval,
                g,
                g2,
            };
        }
        Ok(Minimum {
            u: start.u,
            fval: start.fval,
            edm: f64::NAN,
            niterations,
            converged: false,
        })
    }

    /// Numerical Hessian of chi-squared in internal space
    fn hessian(
        &self,
        chi2: &Chi2<'_, '_>,
        u: &DVector<f64>,
        fval: f64,
    ) -> Result<DMatrix<f64>, ConvergenceError> {
        let n = u.len();
        let mut steps = u.map(|u| INITIAL_STEP * u.abs().max(1.0));
        let mut hessian = DMatrix::zeros(n, n);
        let finite = |value: f64| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(ConvergenceError::new(
                    NAME,
                    "chi-squared is not finite next to the minimum",
                ))
            }
        };
        for k in 0..n {
            for _ in 0..HESSE_PASSES {
                let h = steps[k];
                let fp = finite(chi2.eval(&shifted(u, k, h))?)?;
                let fm = finite(chi2.eval(&shifted(u, k, -h))?)?;
                let g2 = (fp + fm - 2.0 * fval) / (h * h);
                if g2.is_nan() || g2 <= 0.0 {
                    return Err(ConvergenceError::new(
                        NAME,
                        format!("second derivative by free parameter {k} is not positive"),
                    ));
                }
                hessian[(k, k)] = g2;
                let next = f64::sqrt(2.0 * HESSE_DELTA_CHI2 / g2);
                steps[k] = next;
                if (0.5..2.0).contains(&(next / h)) {
                    break;
                }
            }
        }
        for k in 0..n {
            for l in 0..k {
                let (hk, hl) = (steps[k], steps[l]);
                let corner = |sk: f64, sl: f64| -> Result<f64, ConvergenceError> {
                    finite(chi2.eval(&shifted(&shifted(u, k, sk * hk), l, sl * hl))?)
                };
                let value = (corner(1.0, 1.0)? - corner(1.0, -1.0)? - corner(-1.0, 1.0)?
                    + corner(-1.0, -1.0)?)
                    / (4.0 * hk * hl);
                hessian[(k, l)] = value;
                hessian[(l, k)] = value;
            }
        }
        Ok(hessian)
    }

    /// Profile chi-squared with free parameter `k` held at `value`
    fn profile(
        &self,
        problem: &CurveFitProblem<'_>,
        transforms: &[Transform],
        best: &Array1<f64>,
        k: usize,
        value: f64,
    ) -> Result<f64, ConvergenceError> {
        let chi2 = Chi2 {
            problem,
            transforms,
            held: Some((k, value)),
        };
        let mut start = best.clone();
        start[k] = value;
        let u0 = chi2.internal(&start);
        if !chi2.eval(&u0)?.is_finite() {
            return Ok(f64::INFINITY);
        }
        let minimum = self.minimize(&chi2, u0)?;
        if !minimum.converged {
            warn!(
                "{NAME}: profile of free parameter {k} at {value} stopped after {} iterations",
                minimum.niterations
            );
            return Err(ConvergenceError::new(
                NAME,
                format!("profile chi-squared of free parameter {k} at {value} did not converge"),
            ));
        }
        Ok(minimum.fval)
    }

    /// Distance from the minimum to the crossing of `chi2_min + 1` along `direction`
    ///
    /// The search stops at the parameter's bound if the crossing lies beyond it.
    fn minos_error(
        &self,
        problem: &CurveFitProblem<'_>,
        transforms: &[Transform],
        best: &Array1<f64>,
        fmin: f64,
        k: usize,
        sigma: f64,
        direction: f64,
    ) -> Result<f64, ConvergenceError> {
        if sigma.is_nan() || sigma <= 0.0 {
            return Ok(0.0);
        }
        let limit = if direction > 0.0 {
            problem.upper[k]
        } else {
            problem.lower[k]
        };
        let max_distance = (limit - best[k]).abs();
        let target = fmin + ERROR_DEF;
        let delta = |distance: f64| -> Result<f64, ConvergenceError> {
            let value = best[k] + direction * distance;
            Ok(self.profile(problem, transforms, best, k, value)? - target)
        };

        let (mut a, mut fa) = (0.0, fmin - target);
        let mut bracket = None;
        let mut distance = sigma;
        for _ in 0..MINOS_MAX_BRACKETS {
            let at_limit = distance >= max_distance;
            let d = distance.min(max_distance);
            let fd = delta(d)?;
            if fd >= 0.0 {
                bracket = Some((d, fd));
                break;
            }
            (a, fa) = (d, fd);
            if at_limit {
                return Ok(d);
            }
            distance *= 2.0;
        }
        let (mut b, mut fb) = bracket.ok_or_else(|| {
            ConvergenceError::new(
                NAME,
                format!("MINOS could not bracket the crossing for free parameter {k}"),
            )
        })?;

        // Illinois variant of regula falsi, `fa < 0 <= fb`
        let mut side = 0;
        let mut c = b;
        for _ in 0..MINOS_MAX_ITERATIONS {
            c = if fb.is_finite() {
                (a * fb - b * fa) / (fb - fa)
            } else {
                0.5 * (a + b)
            };
            let fc = delta(c)?;
            if fc.abs() < MINOS_TOLERANCE || (b - a).abs() < EPS2 * sigma {
                return Ok(c);
            }
            if fc < 0.0 {
                (a, fa) = (c, fc);
                if side == -1 {
                    fb *= 0.5;
                }
                side = -1;
            } else {
                (b, fb) = (c, fc);
                if side == 1 {
                    fa *= 0.5;
                }
                side = 1;
            }
        }
        warn!("{NAME}: MINOS crossing for free parameter {k} is not refined to tolerance");
        Ok(c)
    }
}

impl Default for MigradCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_tolerance(),
            Self::default_minos(),
        )
    }
}

impl CurveFitTrait for MigradCurveFit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn curve_fit(&self, problem: &CurveFitProblem<'_>) -> Result<CurveFitResult, ConvergenceError> {
        if !within_bounds(problem.x0.view(), problem.lower.view(), problem.upper.view()) {
            return Err(ConvergenceError::new(
                NAME,
                "initial guess is outside of the parameter bounds",
            ));
        }
        let transforms: Vec<_> = problem
            .lower
            .iter()
            .zip(problem.upper.iter())
            .map(|(&lower, &upper)| Transform::new(lower, upper))
            .collect();
        let chi2 = Chi2 {
            problem,
            transforms: &transforms,
            held: None,
        };

        let minimum = self.minimize(&chi2, chi2.internal(&problem.x0))?;
        if !minimum.converged {
            warn!(
                "{NAME} stopped after {} iterations with chi2 = {}, edm = {}",
                minimum.niterations, minimum.fval, minimum.edm
            );
            return Err(ConvergenceError::new(
                NAME,
                format!(
                    "maximum number of iterations ({}) is reached, edm = {:e}",
                    self.niterations, minimum.edm
                ),
            ));
        }
        debug!(
            "{NAME} converged after {} iterations, chi2 = {}, edm = {:e}",
            minimum.niterations, minimum.fval, minimum.edm
        );
        let x = chi2.external(&minimum.u);

        let hessian = self.hessian(&chi2, &minimum.u, minimum.fval)?;
        let internal_covariance = spd_inverse(hessian).ok_or_else(|| {
            ConvergenceError::new(NAME, "Hessian matrix is singular or not positive definite")
        })? * (2.0 * ERROR_DEF);
        let jacobian = DVector::from_iterator(
            transforms.len(),
            transforms
                .iter()
                .zip(minimum.u.iter())
                .map(|(t, &u)| t.derivative(u)),
        );
        let covariance = to_array2(&DMatrix::from_fn(x.len(), x.len(), |i, j| {
            jacobian[i] * internal_covariance[(i, j)] * jacobian[j]
        }));
        let err = covariance.diag().mapv(f64::sqrt);

        let (err_low, err_high) = if self.minos {
            let mut err_low = Array1::zeros(x.len());
            let mut err_high = Array1::zeros(x.len());
            for k in 0..x.len() {
                err_low[k] =
                    self.minos_error(problem, &transforms, &x, minimum.fval, k, err[k], -1.0)?;
                err_high[k] =
                    self.minos_error(problem, &transforms, &x, minimum.fval, k, err[k], 1.0)?;
            }
            (err_low, err_high)
        } else {
            (err.clone(), err)
        };

        Ok(CurveFitResult {
            x,
            err_low,
            err_high,
            covariance,
            chi2: minimum.fval,
            niterations: minimum.niterations,
        })
    }
}

struct Minimum {
    u: DVector<f64>,
    fval: f64,
    edm: f64,
    niterations: usize,
    converged: bool,
}

/// Chi-squared as a function of the internal parameters, optionally with one parameter held
struct Chi2<'p, 'a> {
    problem: &'p CurveFitProblem<'a>,
    transforms: &'p [Transform],
    held: Option<(usize, f64)>,
}

impl Chi2<'_, '_> {
    fn is_varied(&self, k: usize) -> bool {
        self.held.is_none_or(|(held, _)| held != k)
    }

    fn internal(&self, external: &Array1<f64>) -> DVector<f64> {
        let values: Vec<_> = external
            .iter()
            .zip(self.transforms)
            .enumerate()
            .filter(|&(k, _)| self.is_varied(k))
            .map(|(_, (&x, t))| t.to_internal(x))
            .collect();
        DVector::from_vec(values)
    }

    fn external(&self, u: &DVector<f64>) -> Array1<f64> {
        let mut internal = u.iter();
        self.transforms
            .iter()
            .enumerate()
            .map(|(k, t)| match self.held {
                Some((held, value)) if held == k => value,
                _ => internal.next().map_or(f64::NAN, |&u| t.to_external(u)),
            })
            .collect()
    }

    fn eval(&self, u: &DVector<f64>) -> Result<f64, ConvergenceError> {
        self.problem.trial_chi2(NAME, self.external(u).view())
    }
}

fn shifted(u: &DVector<f64>, k: usize, h: f64) -> DVector<f64> {
    let mut u = u.clone();
    u[k] += h;
    u
}

/// Inverse of a diagonal second derivative, unit step where it is not positive
fn diagonal_step(g2: f64) -> f64 {
    if g2 > 0.0 && g2.is_finite() {
        1.0 / g2
    } else {
        1.0
    }
}

fn argmin_failure(err: argmin::core::Error) -> ConvergenceError {
    err.downcast::<ConvergenceError>()
        .unwrap_or_else(|err| ConvergenceError::new(NAME, format!("BFGS failed: {err}")))
}

type Bfgs = BFGS<BacktrackingLineSearch<Vec<f64>, Vec<f64>, ArmijoCondition<f64>, f64>, f64>;

/// Point a BFGS run starts from, with its gradient and diagonal second derivatives
#[derive(Clone)]
struct Start {
    u: DVector<f64>,
    fval: f64,
    g: DVector<f64>,
    g2: DVector<f64>,
}

/// Internal-space chi-squared as seen by `argmin`
///
/// Gradient steps are shared between runs, so every run keeps the steps tuned by the previous one.
struct InternalChi2<'m, 'c, 'p, 'a> {
    migrad: &'m MigradCurveFit,
    chi2: &'c Chi2<'p, 'a>,
    steps: &'c RefCell<DVector<f64>>,
}

impl CostFunction for InternalChi2<'_, '_, '_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.chi2.eval(&DVector::from_column_slice(u))?)
    }
}

impl Gradient for InternalChi2<'_, '_, '_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, u: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let u = DVector::from_column_slice(u);
        let fval = self.chi2.eval(&u)?;
        if !fval.is_finite() {
            return Err(ConvergenceError::new(
                NAME,
                "gradient is requested where chi-squared is not finite",
            )
            .into());
        }
        let (g, _) = self
            .migrad
            .gradient(self.chi2, &u, fval, &mut self.steps.borrow_mut(), 1)?;
        Ok(g.as_slice().to_vec())
    }
}
