use global_curve_fit::{Model, ModelFunction, RawDataset};
use ndarray::{Array1, ArrayView1};
use rand::prelude::*;
use rand_distr::Normal;

/// `p[0] + p[1] * x`
pub fn line_model() -> Model {
    Model::pointwise(|x, p, _| p[0] + p[1] * x)
}

/// Lorentzian peak on a flat baseline, `p = [amplitude, center, width, baseline]`
#[derive(Clone, Copy, Debug)]
pub struct Lorentzian;

impl ModelFunction for Lorentzian {
    fn eval(&self, x: ArrayView1<f64>, p: &[f64], _metadata: &[f64]) -> Array1<f64> {
        x.mapv(|x| {
            let u = (x - p[1]) / p[2];
            p[3] + p[0] / (1.0 + u * u)
        })
    }
}

pub fn lorentzian_model() -> Model {
    Model::from_function(Lorentzian)
}

/// Relaxation `p[0] * exp(-x * p[1] * T)` where the temperature `T` is the dataset's first
/// metadata value
pub fn relaxation_model() -> Model {
    Model::pointwise(|x, p, md| p[0] * f64::exp(-x * p[1] * md[0]))
}

/// Evaluate `model` on `x` with Gaussian noise of standard deviation `sigma` added
pub fn noisy(
    model: &Model,
    x: &Array1<f64>,
    params: &[f64],
    metadata: &[f64],
    sigma: f64,
    rng: &mut impl Rng,
) -> RawDataset {
    let normal = Normal::new(0.0, sigma).unwrap();
    let y = model.eval(x.view(), params, metadata) + x.mapv(|_| normal.sample(rng));
    RawDataset::new(x.clone(), y)
        .with_dy(Array1::from_elem(x.len(), sigma))
        .with_metadata(metadata.to_vec())
}

/// Straight lines sharing `intercept`, one dataset per slope
pub fn shared_intercept_lines(
    intercept: f64,
    slopes: &[f64],
    npoints: usize,
    sigma: f64,
    seed: u64,
) -> Vec<RawDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array1::linspace(0.0, 10.0, npoints);
    slopes
        .iter()
        .map(|&slope| noisy(&line_model(), &x, &[intercept, slope], &[], sigma, &mut rng))
        .collect()
}

/// Lorentzian peaks with a common width and individual amplitudes and centers
pub fn lorentzian_peaks(
    width: f64,
    peaks: &[(f64, f64)],
    baseline: f64,
    npoints: usize,
    sigma: f64,
    seed: u64,
) -> Vec<RawDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array1::linspace(-10.0, 10.0, npoints);
    peaks
        .iter()
        .map(|&(amplitude, center)| {
            noisy(
                &lorentzian_model(),
                &x,
                &[amplitude, center, width, baseline],
                &[],
                sigma,
                &mut rng,
            )
        })
        .collect()
}

/// Relaxation curves measured at several temperatures with one common rate constant
pub fn relaxation_series(
    amplitude: f64,
    rate: f64,
    temperatures: &[f64],
    npoints: usize,
    sigma: f64,
    seed: u64,
) -> Vec<RawDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array1::linspace(0.0, 5.0, npoints);
    temperatures
        .iter()
        .map(|&t| {
            noisy(
                &relaxation_model(),
                &x,
                &[amplitude, rate],
                &[t],
                sigma,
                &mut rng,
            )
        })
        .collect()
}
