#![doc = include_str!("../README.md")]

mod chi2;
pub use chi2::ChiSquaredEvaluator;

pub mod data;
pub use data::{ConcatenatedData, Dataset, ErrorBar, ErrorLayout, RawDataset};

mod error;
pub use error::{
    BoundsError, ConfigurationError, ConvergenceError, DataError, ErrorKind, GlobalFitError,
    StateError,
};

mod fitter;
pub use fitter::{DEFAULT_CURVE_POINTS, FitState, GlobalFitter};

mod model;
pub use model::{Model, ModelFunction, Models};

pub mod nl_fit;
pub use nl_fit::{CurveFitAlgorithm, CurveFitTrait, LmCurveFit, MigradCurveFit};

mod objective;
pub use objective::{GlobalObjective, ObjectiveError};

pub mod params;
pub use params::{BoundsSpec, BroadcastSpec, LinkTable, ParameterSpec};

mod result;
pub use result::{FitResult, ResultInflator};

pub use ndarray;
