use serde::Serialize;

/// Stable tag of a [GlobalFitError]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Configuration,
    Data,
    Bounds,
    Convergence,
    State,
}

/// Malformed input given at construction or at fit time
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("at least one dataset is required")]
    NoDatasets,

    #[error("at least one fit parameter is required")]
    NoParameters,

    #[error("dataset {dataset}: array {array} has length {actual}, but x has length {expected}")]
    LengthMismatch {
        dataset: usize,
        array: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("dataset {dataset}: {low} is given without {high}")]
    LowErrorWithoutHigh {
        dataset: usize,
        low: &'static str,
        high: &'static str,
    },

    #[error("dataset {dataset} carries a different set of error arrays than dataset 0")]
    InconsistentErrors { dataset: usize },

    #[error("{actual} model functions are given for {expected} datasets")]
    FunctionCount { expected: usize, actual: usize },

    #[error("dataset {dataset}: metadata has {actual} values, dataset 0 has {expected}")]
    MetadataShape {
        dataset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{name} has shape {actual:?}, expected a scalar, ({npar},) or ({nsets}, {npar})")]
    WrongShape {
        name: &'static str,
        actual: Vec<usize>,
        nsets: usize,
        npar: usize,
    },

    #[error("parameter {parameter} is both shared and fixed in dataset {dataset}")]
    SharedAndFixed { dataset: usize, parameter: usize },

    #[error("unknown minimizer {0:?}")]
    UnknownMinimizer(String),

    #[error("dataset {dataset}: model returned {actual} values for {expected} points")]
    ModelOutputLength {
        dataset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("dataset index {index} is out of range for {nsets} datasets")]
    DatasetIndex { index: usize, nsets: usize },
}

/// Data that cannot be fitted
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum DataError {
    #[error("dataset {dataset} has no points left after dropping zero-error points")]
    EmptyDataset { dataset: usize },

    #[error(
        "dataset {dataset}: {npoints} points for {nvaried} varied parameters, \
         degrees of freedom must be positive"
    )]
    DatasetDof {
        dataset: usize,
        npoints: usize,
        nvaried: usize,
    },

    #[error("{npoints} points for {nfree} free parameters, degrees of freedom must be positive")]
    GlobalDof { npoints: usize, nfree: usize },

    #[error("dataset {dataset}: model value is not finite")]
    NonFiniteModel { dataset: usize },
}

/// Inconsistent initial guess or bounds
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BoundsError {
    #[error("{name} has {actual} free values, {expected} free parameters are resolved")]
    FreeLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("free parameter {index}: lower bound {lower} is larger than upper bound {upper}")]
    Inverted { index: usize, lower: f64, upper: f64 },

    #[error("free parameter {index}: both bounds are {value}, fix the parameter instead")]
    Collapsed { index: usize, value: f64 },

    #[error("free parameter {index}: initial value {value} is outside of [{lower}, {upper}]")]
    OutOfBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
}

/// Failure reported by a curve-fit backend
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
#[error(
    "{backend} failed{}: {message}",
    .dataset.map(|i| format!(" on dataset {i}")).unwrap_or_default()
)]
pub struct ConvergenceError {
    pub backend: &'static str,
    pub dataset: Option<usize>,
    pub message: String,
}

impl ConvergenceError {
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            dataset: None,
            message: message.into(),
        }
    }

    pub fn with_dataset(mut self, dataset: Option<usize>) -> Self {
        if self.dataset.is_none() {
            self.dataset = dataset;
        }
        self
    }
}

/// Result accessor called before a successful fit
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("fit results are not available in state {state}")]
pub struct StateError {
    pub state: &'static str,
}

/// Error returned from [crate::GlobalFitter]
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum GlobalFitError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("bounds error: {0}")]
    Bounds(#[from] BoundsError),

    #[error("convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl GlobalFitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Data(_) => ErrorKind::Data,
            Self::Bounds(_) => ErrorKind::Bounds,
            Self::Convergence(_) => ErrorKind::Convergence,
            Self::State(_) => ErrorKind::State,
        }
    }
}
