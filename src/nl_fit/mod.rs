//! Non-linear least-squares backends of the global fit.
//!
//! # Overview
//!
//! A backend sees the global fit as an ordinary curve fit in the reduced free-parameter space:
//! a [`CurveFitProblem`] holds the chi-squared cost ([`LeastSquares`]) of all datasets
//! concatenated, together with the flattened initial guess and bounds. Sharing and fixing of
//! parameters is resolved before the backend is called and undone after it returns, so
//! backends never deal with datasets or link tables.
//!
//! # Cost
//!
//! Every backend minimizes the same weighted residual vector `r = (y - f) / sigma_eff`, see
//! [`LeastSquares`] for how `sigma_eff` follows the error arrays of the data. A trial point
//! where any model value is not finite is rejected by the backend instead of aborting the fit.
//!
//! # Curve Fit Algorithms
//!
//! - [`LmCurveFit`]: the `levenberg-marquardt` crate with a forward-difference Jacobian. Bounds
//!   are enforced by projection. Errors are symmetric, `sqrt(diag((J^T J)^-1))`.
//! - [`MigradCurveFit`]: `argmin`'s BFGS on chi-squared in MINUIT's manner, bounds via internal
//!   parameter transforms, covariance from the numerical Hessian (HESSE) and optional
//!   asymmetric MINOS errors.
//!
//! Backends are selected by the [`CurveFitAlgorithm`] enum, which dispatches statically and can
//! be (de)serialized as a part of a configuration.

mod bounds;

mod constants;

pub mod curve_fit;
pub use curve_fit::{CurveFitAlgorithm, CurveFitProblem, CurveFitResult, CurveFitTrait};

pub mod least_squares;
pub use least_squares::LeastSquares;

mod linalg;

pub mod lm;
pub use lm::LmCurveFit;

pub mod migrad;
pub use migrad::MigradCurveFit;
