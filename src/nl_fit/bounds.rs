use ndarray::{Array1, ArrayView1, Zip};

pub(super) fn within_bounds(
    x: ArrayView1<f64>,
    lower: ArrayView1<f64>,
    upper: ArrayView1<f64>,
) -> bool {
    Zip::from(x)
        .and(lower)
        .and(upper)
        .all(|&x, &lower, &upper| x >= lower && x <= upper)
}

pub(super) fn clamp(x: &mut Array1<f64>, lower: ArrayView1<f64>, upper: ArrayView1<f64>) {
    Zip::from(x)
        .and(lower)
        .and(upper)
        .for_each(|x, &lower, &upper| *x = x.clamp(lower, upper));
}

/// Map between a bounded external parameter and an unbounded internal one
///
/// `sin` is used for a double-sided interval and `sqrt` for a single-sided one, so the minimizer
/// can move freely while the model only ever sees values inside the limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum Transform {
    Unbounded,
    Lower(f64),
    Upper(f64),
    Double(f64, f64),
}

impl Transform {
    pub(super) fn new(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => Self::Unbounded,
            (true, false) => Self::Lower(lower),
            (false, true) => Self::Upper(upper),
            (true, true) => Self::Double(lower, upper),
        }
    }

    pub(super) fn to_external(self, internal: f64) -> f64 {
        match self {
            Self::Unbounded => internal,
            Self::Lower(a) => a - 1.0 + f64::sqrt(internal * internal + 1.0),
            Self::Upper(b) => b + 1.0 - f64::sqrt(internal * internal + 1.0),
            Self::Double(a, b) => a + 0.5 * (b - a) * (f64::sin(internal) + 1.0),
        }
    }

    /// `d external / d internal`
    pub(super) fn derivative(self, internal: f64) -> f64 {
        match self {
            Self::Unbounded => 1.0,
            Self::Lower(_) => internal / f64::sqrt(internal * internal + 1.0),
            Self::Upper(_) => -internal / f64::sqrt(internal * internal + 1.0),
            Self::Double(a, b) => 0.5 * (b - a) * f64::cos(internal),
        }
    }

    pub(super) fn to_internal(self, external: f64) -> f64 {
        match self {
            Self::Unbounded => external,
            Self::Lower(a) => {
                let t = external - a + 1.0;
                f64::sqrt((t * t - 1.0).max(0.0))
            }
            Self::Upper(b) => {
                let t = b - external + 1.0;
                f64::sqrt((t * t - 1.0).max(0.0))
            }
            Self::Double(a, b) => {
                if a == b {
                    return 0.0;
                }
                let s = (2.0 * (external - a) / (b - a) - 1.0).clamp(-1.0, 1.0);
                f64::asin(s)
            }
        }
    }
}
