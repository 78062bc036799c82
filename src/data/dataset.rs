use crate::error::{ConfigurationError, DataError, GlobalFitError};

use log::warn;
use ndarray::{Array1, Zip};
use serde::Serialize;

/// Raw arrays of a single dataset as delivered by the ingestion layer
///
/// Asymmetric errors are given as a primary ("high") array plus a `*_low` array for the other
/// side. A `*_low` array without its primary array is rejected by [RawDataset::prepare].
#[derive(Clone, Debug, Default)]
pub struct RawDataset {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub dy: Option<Array1<f64>>,
    pub dy_low: Option<Array1<f64>>,
    pub dx: Option<Array1<f64>>,
    pub dx_low: Option<Array1<f64>>,
    pub metadata: Vec<f64>,
}

impl RawDataset {
    pub fn new(x: impl Into<Array1<f64>>, y: impl Into<Array1<f64>>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            ..Default::default()
        }
    }

    pub fn with_dy(mut self, dy: impl Into<Array1<f64>>) -> Self {
        self.dy = Some(dy.into());
        self
    }

    /// Asymmetric y errors, `high` is used above the model curve and `low` below it
    pub fn with_asymmetric_dy(
        mut self,
        high: impl Into<Array1<f64>>,
        low: impl Into<Array1<f64>>,
    ) -> Self {
        self.dy = Some(high.into());
        self.dy_low = Some(low.into());
        self
    }

    pub fn with_dx(mut self, dx: impl Into<Array1<f64>>) -> Self {
        self.dx = Some(dx.into());
        self
    }

    pub fn with_asymmetric_dx(
        mut self,
        high: impl Into<Array1<f64>>,
        low: impl Into<Array1<f64>>,
    ) -> Self {
        self.dx = Some(high.into());
        self.dx_low = Some(low.into());
        self
    }

    /// Constant covariates appended after the fit parameters when the model is called
    pub fn with_metadata(mut self, metadata: impl Into<Vec<f64>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn layout(&self) -> ErrorLayout {
        ErrorLayout {
            dy: self.dy.is_some(),
            dy_low: self.dy_low.is_some(),
            dx: self.dx.is_some(),
            dx_low: self.dx_low.is_some(),
        }
    }

    /// Validate array lengths and drop points where every supplied error is zero
    pub fn prepare(self, index: usize) -> Result<Dataset, GlobalFitError> {
        let n = self.x.len();
        let check_length = |array: &'static str, a: &Array1<f64>| {
            if a.len() == n {
                Ok(())
            } else {
                Err(ConfigurationError::LengthMismatch {
                    dataset: index,
                    array,
                    expected: n,
                    actual: a.len(),
                })
            }
        };
        check_length("y", &self.y)?;
        let named = [
            ("dy", &self.dy),
            ("dy_low", &self.dy_low),
            ("dx", &self.dx),
            ("dx_low", &self.dx_low),
        ];
        for (name, a) in named {
            if let Some(a) = a {
                check_length(name, a)?;
            }
        }
        if self.dy.is_none() && self.dy_low.is_some() {
            return Err(ConfigurationError::LowErrorWithoutHigh {
                dataset: index,
                low: "dy_low",
                high: "dy",
            }
            .into());
        }
        if self.dx.is_none() && self.dx_low.is_some() {
            return Err(ConfigurationError::LowErrorWithoutHigh {
                dataset: index,
                low: "dx_low",
                high: "dx",
            }
            .into());
        }

        let keep = nonzero_error_mask(n, named.iter().filter_map(|(_, a)| a.as_ref()));
        let nkeep = keep.iter().filter(|&&k| k).count();
        if nkeep == 0 {
            return Err(DataError::EmptyDataset { dataset: index }.into());
        }
        if nkeep < n {
            warn!(
                "dataset {}: dropping {} of {} points with zero errors",
                index,
                n - nkeep,
                n
            );
        }
        let crop = |a: Array1<f64>| -> Array1<f64> {
            if nkeep == n {
                a
            } else {
                a.iter()
                    .zip(keep.iter())
                    .filter_map(|(&v, &k)| k.then_some(v))
                    .collect()
            }
        };

        let dy = self.dy.map(crop).map(|high| match self.dy_low.map(crop) {
            Some(low) => ErrorBar::Asymmetric { high, low },
            None => ErrorBar::Symmetric(high),
        });
        let dx = self.dx.map(crop).map(|high| match self.dx_low.map(crop) {
            Some(low) => ErrorBar::Asymmetric { high, low },
            None => ErrorBar::Symmetric(high),
        });
        Ok(Dataset {
            index,
            x: crop(self.x),
            y: crop(self.y),
            dy,
            dx,
            metadata: self.metadata,
        })
    }
}

/// Mask of points where at least one supplied error array is non-zero
///
/// With no error arrays at all every point is kept.
fn nonzero_error_mask<'a>(n: usize, errors: impl Iterator<Item = &'a Array1<f64>>) -> Vec<bool> {
    let mut any_supplied = false;
    let mut keep = Array1::from_elem(n, false);
    for err in errors {
        any_supplied = true;
        Zip::from(&mut keep)
            .and(err)
            .for_each(|k, &e| *k = *k || e != 0.0);
    }
    if any_supplied {
        keep.to_vec()
    } else {
        vec![true; n]
    }
}

/// Which error arrays a dataset carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorLayout {
    pub dy: bool,
    pub dy_low: bool,
    pub dx: bool,
    pub dx_low: bool,
}

/// Symmetric or asymmetric error bar of one coordinate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ErrorBar {
    Symmetric(Array1<f64>),
    Asymmetric {
        high: Array1<f64>,
        low: Array1<f64>,
    },
}

impl ErrorBar {
    /// The primary ("high") side
    pub fn high(&self) -> &Array1<f64> {
        match self {
            Self::Symmetric(e) => e,
            Self::Asymmetric { high, .. } => high,
        }
    }

    /// The secondary side, equal to [ErrorBar::high] for symmetric errors
    pub fn low(&self) -> &Array1<f64> {
        match self {
            Self::Symmetric(e) => e,
            Self::Asymmetric { low, .. } => low,
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Asymmetric { .. })
    }

    /// Point-wise mean of both sides
    pub fn mean(&self) -> Array1<f64> {
        match self {
            Self::Symmetric(e) => e.clone(),
            Self::Asymmetric { high, low } => (high + low) * 0.5,
        }
    }
}

/// Validated dataset, read-only snapshot of the caller's arrays
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dataset {
    pub index: usize,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub dy: Option<ErrorBar>,
    pub dx: Option<ErrorBar>,
    pub metadata: Vec<f64>,
}

impl Dataset {
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn layout(&self) -> ErrorLayout {
        ErrorLayout {
            dy: self.dy.is_some(),
            dy_low: self.dy.as_ref().is_some_and(ErrorBar::is_asymmetric),
            dx: self.dx.is_some(),
            dx_low: self.dx.as_ref().is_some_and(ErrorBar::is_asymmetric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorKind;

    use ndarray::array;

    #[test]
    fn zero_error_points_are_dropped() {
        let ds = RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0])
            .with_dy(vec![0.1, 0.0, 0.1])
            .prepare(0)
            .unwrap();
        assert_eq!(ds.x, array![0.0, 2.0]);
        assert_eq!(ds.y, array![1.0, 3.0]);
        assert_eq!(ds.dy, Some(ErrorBar::Symmetric(array![0.1, 0.1])));
    }

    #[test]
    fn point_is_kept_if_any_error_is_nonzero() {
        let ds = RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0])
            .with_dy(vec![0.0, 0.0, 0.1])
            .with_dx(vec![0.0, 0.5, 0.0])
            .prepare(0)
            .unwrap();
        assert_eq!(ds.x, array![1.0, 2.0]);
        assert_eq!(ds.dx.unwrap().high(), &array![0.5, 0.0]);
    }

    #[test]
    fn no_errors_keep_everything() {
        let ds = RawDataset::new(vec![0.0, 1.0], vec![1.0, 2.0])
            .prepare(3)
            .unwrap();
        assert_eq!(ds.index, 3);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.layout(), ErrorLayout::default());
    }

    #[test]
    fn asymmetric_errors_are_cropped_together() {
        let ds = RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0])
            .with_asymmetric_dy(vec![0.2, 0.0, 0.3], vec![0.1, 0.0, 0.4])
            .prepare(0)
            .unwrap();
        assert_eq!(
            ds.dy,
            Some(ErrorBar::Asymmetric {
                high: array![0.2, 0.3],
                low: array![0.1, 0.4],
            })
        );
        assert!(ds.layout().dy_low);
    }

    #[test]
    fn length_mismatch() {
        let err = RawDataset::new(vec![0.0, 1.0], vec![1.0])
            .prepare(1)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::LengthMismatch {
                dataset: 1,
                array: "y",
                expected: 2,
                actual: 1
            }
            .into()
        );
        let err = RawDataset::new(vec![0.0, 1.0], vec![1.0, 2.0])
            .with_dx(vec![1.0])
            .prepare(0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn low_error_requires_high() {
        let raw = RawDataset {
            dy_low: Some(array![1.0, 1.0]),
            ..RawDataset::new(vec![0.0, 1.0], vec![1.0, 2.0])
        };
        assert_eq!(raw.prepare(0).unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn all_zero_errors_is_data_error() {
        let err = RawDataset::new(vec![0.0, 1.0], vec![1.0, 2.0])
            .with_dy(vec![0.0, 0.0])
            .prepare(4)
            .unwrap_err();
        assert_eq!(err, DataError::EmptyDataset { dataset: 4 }.into());
    }
}
