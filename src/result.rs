use crate::nl_fit::CurveFitResult;
use crate::params::{Link, LinkTable, inflate};

use ndarray::{Array1, Array2, Array3, ArrayView1};
use serde::Serialize;

/// Outcome of a successful global fit
///
/// Reduced quantities are indexed by the free parameters, `*_runwise` quantities by dataset and
/// parameter slot. Covariance entries touching a fixed slot are NaN, errors of fixed slots are
/// zero.
#[derive(Clone, Debug, Serialize)]
pub struct FitResult {
    pub par: Array1<f64>,
    pub cov: Array2<f64>,
    pub std_low: Array1<f64>,
    pub std_high: Array1<f64>,
    pub par_runwise: Array2<f64>,
    pub cov_runwise: Array3<f64>,
    pub std_low_runwise: Array2<f64>,
    pub std_high_runwise: Array2<f64>,
    pub chi_global: f64,
    pub chi_per_dataset: Array1<f64>,
    /// Minimum chi-squared, not divided by degrees of freedom
    pub chi2: f64,
    pub niterations: usize,
}

impl FitResult {
    /// `sqrt(diag(cov_runwise[i]))`, NaN at fixed slots
    pub fn std_runwise(&self) -> Array2<f64> {
        let (nsets, npar, _) = self.cov_runwise.dim();
        Array2::from_shape_fn((nsets, npar), |(i, j)| self.cov_runwise[[i, j, j]].sqrt())
    }
}

/// Expands reduced backend output to per-dataset matrices with the link table
#[derive(Clone, Copy, Debug)]
pub struct ResultInflator<'a> {
    links: &'a LinkTable,
    fixed_values: &'a Array2<f64>,
}

impl<'a> ResultInflator<'a> {
    /// `fixed_values` is the dense initial guess fixed constants are read from
    pub fn new(links: &'a LinkTable, fixed_values: &'a Array2<f64>) -> Self {
        assert_eq!(fixed_values.dim(), (links.nsets(), links.npar()));
        Self {
            links,
            fixed_values,
        }
    }

    pub fn parameters(&self, par: ArrayView1<f64>) -> Array2<f64> {
        inflate(self.links, par, self.fixed_values)
    }

    pub fn covariance(&self, cov: &Array2<f64>) -> Array3<f64> {
        let (nsets, npar) = (self.links.nsets(), self.links.npar());
        Array3::from_shape_fn((nsets, npar, npar), |(i, a, b)| {
            match (self.links.link(i, a), self.links.link(i, b)) {
                (Link::Free(fa), Link::Free(fb)) => cov[[fa, fb]],
                _ => f64::NAN,
            }
        })
    }

    pub fn errors(&self, err: ArrayView1<f64>) -> Array2<f64> {
        let (nsets, npar) = (self.links.nsets(), self.links.npar());
        Array2::from_shape_fn((nsets, npar), |(i, j)| match self.links.link(i, j) {
            Link::Free(f) => err[f],
            Link::Fixed(_) => 0.0,
        })
    }

    pub fn inflate(
        &self,
        raw: CurveFitResult,
        chi_global: f64,
        chi_per_dataset: Array1<f64>,
    ) -> FitResult {
        FitResult {
            par_runwise: self.parameters(raw.x.view()),
            cov_runwise: self.covariance(&raw.covariance),
            std_low_runwise: self.errors(raw.err_low.view()),
            std_high_runwise: self.errors(raw.err_high.view()),
            par: raw.x,
            cov: raw.covariance,
            std_low: raw.err_low,
            std_high: raw.err_high,
            chi_global,
            chi_per_dataset,
            chi2: raw.chi2,
            niterations: raw.niterations,
        }
    }
}
