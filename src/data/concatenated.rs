use crate::data::{Dataset, ErrorBar};
use crate::error::ConfigurationError;

use itertools::Itertools;
use ndarray::{Array1, ArrayView1, s};
use std::ops::Range;

/// All datasets glued end to end, the observation side of the global objective
///
/// `dy` holds the primary (high) y errors, `dy_low` the low side for asymmetric y errors and `dx`
/// the mean of both x error sides.
#[derive(Clone, Debug)]
pub struct ConcatenatedData {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub dy: Option<Array1<f64>>,
    pub dy_low: Option<Array1<f64>>,
    pub dx: Option<Array1<f64>>,
    ranges: Vec<Range<usize>>,
}

impl ConcatenatedData {
    pub fn new(datasets: &[Dataset]) -> Result<Self, ConfigurationError> {
        let first = datasets.first().ok_or(ConfigurationError::NoDatasets)?;
        let layout = first.layout();
        if let Some(ds) = datasets.iter().find(|ds| ds.layout() != layout) {
            return Err(ConfigurationError::InconsistentErrors { dataset: ds.index });
        }

        let mut ranges = Vec::with_capacity(datasets.len());
        let mut offset = 0;
        for ds in datasets {
            ranges.push(offset..offset + ds.len());
            offset += ds.len();
        }

        let x = cat(datasets.iter().map(|ds| ds.x.view()));
        let y = cat(datasets.iter().map(|ds| ds.y.view()));
        let dy = layout
            .dy
            .then(|| cat_error(datasets, |ds| ds.dy.as_ref().map(ErrorBar::high)));
        let dy_low = layout
            .dy_low
            .then(|| cat_error(datasets, |ds| ds.dy.as_ref().map(ErrorBar::low)));
        let dx = layout.dx.then(|| {
            let means = datasets
                .iter()
                .filter_map(|ds| ds.dx.as_ref().map(ErrorBar::mean))
                .collect_vec();
            cat(means.iter().map(|a| a.view()))
        });

        Ok(Self {
            x,
            y,
            dy,
            dy_low,
            dx,
            ranges,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[inline]
    pub fn nsets(&self) -> usize {
        self.ranges.len()
    }

    /// Positions of dataset `i` inside the concatenated arrays
    #[inline]
    pub fn range(&self, i: usize) -> Range<usize> {
        self.ranges[i].clone()
    }

    pub fn slice<'a>(&self, a: &'a Array1<f64>, i: usize) -> ArrayView1<'a, f64> {
        a.slice(s![self.range(i)])
    }
}

fn cat<'a>(views: impl Iterator<Item = ArrayView1<'a, f64>>) -> Array1<f64> {
    views.flat_map(|v| v.into_iter().copied()).collect()
}

fn cat_error<'a>(
    datasets: &'a [Dataset],
    side: impl Fn(&'a Dataset) -> Option<&'a Array1<f64>>,
) -> Array1<f64> {
    cat(datasets.iter().filter_map(side).map(|a| a.view()))
}
