//! Conversions between `ndarray` and `nalgebra` and the covariance inverse of the backends

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1};

pub(super) fn to_dvector(a: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(a.len(), a.iter().copied())
}

pub(super) fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    v.iter().copied().collect()
}

pub(super) fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Inverse of a symmetric positive-definite matrix, `None` if it is singular or indefinite
pub(super) fn spd_inverse(a: DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = a.cholesky()?.inverse();
    let positive = (0..inv.nrows()).all(|i| inv[(i, i)] > 0.0);
    (positive && inv.iter().all(|v| v.is_finite())).then(|| symmetrize(inv))
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}
