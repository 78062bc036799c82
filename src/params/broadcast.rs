use crate::error::ConfigurationError;
use crate::params::link_table::{Link, LinkTable};

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Value given for every dataset and parameter in one of three shapes
///
/// Deserializes from a number, a list of `npar` numbers or a list of `nsets` lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastSpec<T> {
    Scalar(T),
    PerParameter(Vec<T>),
    PerDatasetPerParameter(Vec<Vec<T>>),
}

impl<T: Clone> BroadcastSpec<T> {
    /// Dense `(nsets, npar)` matrix
    pub fn expand(
        &self,
        name: &'static str,
        nsets: usize,
        npar: usize,
    ) -> Result<Array2<T>, ConfigurationError> {
        let wrong_shape = |actual: Vec<usize>| ConfigurationError::WrongShape {
            name,
            actual,
            nsets,
            npar,
        };
        match self {
            Self::Scalar(v) => Ok(Array2::from_elem((nsets, npar), v.clone())),
            Self::PerParameter(v) => {
                if v.len() != npar {
                    return Err(wrong_shape(vec![v.len()]));
                }
                Ok(Array2::from_shape_fn((nsets, npar), |(_, j)| v[j].clone()))
            }
            Self::PerDatasetPerParameter(m) => {
                if m.len() != nsets || m.iter().any(|row| row.len() != npar) {
                    let ncols = m
                        .iter()
                        .map(Vec::len)
                        .find(|&l| l != npar)
                        .unwrap_or(npar);
                    return Err(wrong_shape(vec![m.len(), ncols]));
                }
                Ok(Array2::from_shape_fn((nsets, npar), |(i, j)| {
                    m[i][j].clone()
                }))
            }
        }
    }
}

impl From<f64> for BroadcastSpec<f64> {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<bool> for BroadcastSpec<bool> {
    fn from(value: bool) -> Self {
        Self::Scalar(value)
    }
}

impl<T> From<Vec<T>> for BroadcastSpec<T> {
    fn from(value: Vec<T>) -> Self {
        Self::PerParameter(value)
    }
}

impl<T, const N: usize> From<[T; N]> for BroadcastSpec<T> {
    fn from(value: [T; N]) -> Self {
        Self::PerParameter(value.into())
    }
}

impl<T: Clone> From<Array2<T>> for BroadcastSpec<T> {
    fn from(value: Array2<T>) -> Self {
        Self::PerDatasetPerParameter(value.outer_iter().map(|row| row.to_vec()).collect())
    }
}

/// Lower and upper limits of the fit parameters, each in any [BroadcastSpec] shape
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundsSpec {
    pub lower: BroadcastSpec<f64>,
    pub upper: BroadcastSpec<f64>,
}

impl BoundsSpec {
    pub fn new(lower: impl Into<BroadcastSpec<f64>>, upper: impl Into<BroadcastSpec<f64>>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Dense `(lower, upper)` matrices
    pub fn expand(
        &self,
        nsets: usize,
        npar: usize,
    ) -> Result<(Array2<f64>, Array2<f64>), ConfigurationError> {
        Ok((
            self.lower.expand("lower bounds", nsets, npar)?,
            self.upper.expand("upper bounds", nsets, npar)?,
        ))
    }
}

impl Default for BoundsSpec {
    fn default() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }
}

/// Reduce a dense `(nsets, npar)` matrix to the free-parameter vector
///
/// Fixed slots are dropped, a shared parameter takes the value of its first dataset.
pub fn flatten<T: Clone>(links: &LinkTable, dense: &Array2<T>) -> Array1<T> {
    links
        .owners()
        .iter()
        .map(|&(i, j)| dense[[i, j]].clone())
        .collect()
}

/// Dense `(nsets, npar)` matrix from the free-parameter vector and the fixed constants
///
/// `fixed_values` is the dense matrix the fixed constants are taken from, usually the initial
/// guess.
pub fn inflate(
    links: &LinkTable,
    free: ArrayView1<f64>,
    fixed_values: &Array2<f64>,
) -> Array2<f64> {
    let npar = links.npar();
    Array2::from_shape_fn((links.nsets(), npar), |(i, j)| match links.link(i, j) {
        Link::Free(f) => free[f],
        Link::Fixed(k) => fixed_values[[k / npar, k % npar]],
    })
}
