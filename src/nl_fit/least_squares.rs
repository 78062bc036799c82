use crate::data::ConcatenatedData;
use crate::objective::{GlobalObjective, ObjectiveError};

use ndarray::{Array1, ArrayView1, s};

/// Chi-squared cost of the global objective against the concatenated observations
///
/// The weight of every point follows the errors the datasets carry:
/// - no errors: unit weights;
/// - `dy`: `(y - f) / dy`;
/// - asymmetric `dy`: the low side is used where `y < f`, the high side otherwise;
/// - `dx`: effective variance `(dx f'(x))^2 + dy^2`, asymmetric `dx` is averaged beforehand.
#[derive(Clone, Debug)]
pub struct LeastSquares<'a> {
    objective: GlobalObjective<'a>,
    data: &'a ConcatenatedData,
}

impl<'a> LeastSquares<'a> {
    pub fn new(objective: GlobalObjective<'a>, data: &'a ConcatenatedData) -> Self {
        assert_eq!(objective.nsets(), data.nsets());
        Self { objective, data }
    }

    pub fn objective(&self) -> &GlobalObjective<'a> {
        &self.objective
    }

    pub fn data(&self) -> &ConcatenatedData {
        self.data
    }

    #[inline]
    pub fn npoints(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn nfree(&self) -> usize {
        self.objective.nfree()
    }

    /// Weighted residuals `(y - f) / sigma` of dataset `i` for its full parameter vector
    pub fn dataset_residuals(
        &self,
        i: usize,
        params: &[f64],
    ) -> Result<Array1<f64>, ObjectiveError> {
        let model = self.objective.eval_dataset(i, params)?;
        let slope = match self.data.dx {
            Some(_) => Some(self.objective.slope_dataset(i, params)?),
            None => None,
        };
        let range = self.data.range(i);
        let view = |a: &'a Option<Array1<f64>>| a.as_ref().map(|a| a.slice(s![range.clone()]));
        Ok(weighted_residuals(
            self.data.slice(&self.data.y, i),
            model.view(),
            slope.as_ref().map(Array1::view),
            view(&self.data.dy),
            view(&self.data.dy_low),
            view(&self.data.dx),
        ))
    }

    /// Weighted residuals of all datasets, aligned with the concatenated observations
    pub fn residuals(&self, free: ArrayView1<f64>) -> Result<Array1<f64>, ObjectiveError> {
        let mut output = Vec::with_capacity(self.npoints());
        for i in 0..self.objective.nsets() {
            let params = self.objective.params_of(i, free);
            output.extend(self.dataset_residuals(i, &params)?.iter().copied());
        }
        Ok(output.into())
    }

    pub fn chi2(&self, free: ArrayView1<f64>) -> Result<f64, ObjectiveError> {
        Ok(self.residuals(free)?.mapv(|r| r * r).sum())
    }

    /// Chi-squared of dataset `i` alone
    pub fn dataset_chi2(&self, i: usize, params: &[f64]) -> Result<f64, ObjectiveError> {
        Ok(self.dataset_residuals(i, params)?.mapv(|r| r * r).sum())
    }
}

fn weighted_residuals(
    y: ArrayView1<f64>,
    model: ArrayView1<f64>,
    slope: Option<ArrayView1<f64>>,
    dy: Option<ArrayView1<f64>>,
    dy_low: Option<ArrayView1<f64>>,
    dx: Option<ArrayView1<f64>>,
) -> Array1<f64> {
    Array1::from_shape_fn(y.len(), |k| {
        let diff = y[k] - model[k];
        let sigma_y = match (dy, dy_low) {
            (Some(_), Some(low)) if y[k] < model[k] => Some(low[k]),
            (Some(high), _) => Some(high[k]),
            (None, _) => None,
        };
        let variance = match (dx, slope) {
            (Some(dx), Some(slope)) => {
                (dx[k] * slope[k]).powi(2) + sigma_y.map_or(0.0, |s| s * s)
            }
            _ => sigma_y.map_or(1.0, |s| s * s),
        };
        diff / variance.sqrt()
    })
}
