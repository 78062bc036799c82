/// Relative step of forward and central differences in parameter space, `sqrt(eps)`
pub const RELATIVE_STEP: f64 = 1.4901161193847656e-8;

/// Chi-squared increase which defines one standard deviation
pub const ERROR_DEF: f64 = 1.0;

/// Chi-squared of a trial point where the model is not finite
pub const REJECTED_CHI2: f64 = f64::INFINITY;

/// Weighted residual reported to Levenberg-Marquardt at a rejected trial point, large enough to
/// make the step fail while keeping the sum of squares finite
pub const REJECTED_RESIDUAL: f64 = 1e100;
