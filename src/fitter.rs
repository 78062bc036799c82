use crate::chi2::ChiSquaredEvaluator;
use crate::data::{ConcatenatedData, Dataset, RawDataset};
use crate::error::{BoundsError, ConfigurationError, GlobalFitError, StateError};
use crate::model::{Model, Models};
use crate::nl_fit::{CurveFitAlgorithm, CurveFitProblem, CurveFitTrait, LeastSquares};
use crate::objective::GlobalObjective;
use crate::params::{BoundsSpec, BroadcastSpec, LinkTable, ParameterSpec, flatten};
use crate::result::{FitResult, ResultInflator};

use log::{info, warn};
use ndarray::{Array1, Array2, Array3, ArrayView1, Zip};

/// Number of points of [GlobalFitter::model_curve] when none is given
pub const DEFAULT_CURVE_POINTS: usize = 500;

/// Life cycle of a [GlobalFitter]
///
/// `Constructed -> FitRequested -> Solving -> Fitted | Failed`. A fit may be requested again from
/// any state, it replaces the previous outcome once the request is validated.
#[derive(Clone, Debug)]
pub enum FitState {
    Constructed,
    FitRequested,
    Solving,
    Fitted(FitResult),
    Failed(GlobalFitError),
}

impl FitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constructed => "Constructed",
            Self::FitRequested => "FitRequested",
            Self::Solving => "Solving",
            Self::Fitted(_) => "Fitted",
            Self::Failed(_) => "Failed",
        }
    }
}

/// Simultaneous fit of several datasets with shared and fixed parameters
///
/// Sharing and fixing are resolved once at construction into an immutable [LinkTable], so a new
/// fitter is needed to change them. Every [GlobalFitter::fit] or [GlobalFitter::request_fit] call
/// validates its input before the backend runs and leaves the fitter untouched if the validation
/// fails.
///
/// ```
/// use global_curve_fit::{CurveFitAlgorithm, GlobalFitter, Model, RawDataset};
///
/// let datasets = vec![
///     RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0, 4.0]),
///     RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 3.0, 5.0]),
/// ];
/// let line = Model::pointwise(|x, p, _| p[0] + p[1] * x);
/// let algorithm = CurveFitAlgorithm::from_name("lm").unwrap();
/// let mut fitter = GlobalFitter::new(datasets, line, vec![true, false], None, algorithm).unwrap();
/// let result = fitter.fit(None, None).unwrap();
/// assert_eq!(result.par_runwise[[0, 0]], result.par_runwise[[1, 0]]);
/// ```
#[derive(Clone, Debug)]
pub struct GlobalFitter {
    datasets: Vec<Dataset>,
    models: Vec<Model>,
    spec: ParameterSpec,
    links: LinkTable,
    data: ConcatenatedData,
    algorithm: CurveFitAlgorithm,
    state: FitState,
    request: Option<FitRequest>,
}

/// Validated input of a requested fit
#[derive(Clone, Debug)]
struct FitRequest {
    p0: Array2<f64>,
    x0: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl GlobalFitter {
    /// Validate and prepare the datasets and resolve parameter links
    ///
    /// # Arguments
    /// - `datasets`: raw observations, zero-error points are dropped here
    /// - `models`: a single model for every dataset or one model per dataset
    /// - `shared`: one flag per parameter, its length defines the number of parameters
    /// - `fixed`: fixed flags per parameter or per dataset and parameter, `None` for nothing fixed
    /// - `algorithm`: backend which minimizes chi-squared
    pub fn new(
        datasets: Vec<RawDataset>,
        models: impl Into<Models>,
        shared: Vec<bool>,
        fixed: Option<BroadcastSpec<bool>>,
        algorithm: CurveFitAlgorithm,
    ) -> Result<Self, GlobalFitError> {
        let nsets = datasets.len();
        if nsets == 0 {
            return Err(ConfigurationError::NoDatasets.into());
        }
        let models = models.into();
        if let Some(count) = models.count().filter(|&count| count != nsets) {
            return Err(ConfigurationError::FunctionCount {
                expected: nsets,
                actual: count,
            }
            .into());
        }
        let models = models.broadcast(nsets);

        let datasets = datasets
            .into_iter()
            .enumerate()
            .map(|(i, ds)| ds.prepare(i))
            .collect::<Result<Vec<_>, _>>()?;
        let ncovariates = datasets[0].metadata.len();
        if let Some(ds) = datasets.iter().find(|ds| ds.metadata.len() != ncovariates) {
            return Err(ConfigurationError::MetadataShape {
                dataset: ds.index,
                expected: ncovariates,
                actual: ds.metadata.len(),
            }
            .into());
        }

        let spec = ParameterSpec::new(nsets, shared, fixed)?;
        let links = LinkTable::resolve(&spec);
        let data = ConcatenatedData::new(&datasets)?;
        info!(
            "global fit of {} datasets ({} points) with {} parameters each, {} free",
            nsets,
            data.len(),
            spec.npar(),
            links.nfree()
        );

        Ok(Self {
            datasets,
            models,
            spec,
            links,
            data,
            algorithm,
            state: FitState::Constructed,
            request: None,
        })
    }

    #[inline]
    pub fn nsets(&self) -> usize {
        self.spec.nsets()
    }

    #[inline]
    pub fn npar(&self) -> usize {
        self.spec.npar()
    }

    #[inline]
    pub fn nfree(&self) -> usize {
        self.links.nfree()
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn parameter_spec(&self) -> &ParameterSpec {
        &self.spec
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn algorithm(&self) -> &CurveFitAlgorithm {
        &self.algorithm
    }

    pub fn state(&self) -> &FitState {
        &self.state
    }

    /// Fit all datasets simultaneously
    ///
    /// `p0` defaults to ones and `bounds` to `(-inf, inf)`. Values of fixed slots are taken from
    /// `p0`, bounds of fixed slots are ignored. Shared parameters take their initial value and
    /// bounds from dataset 0. Same as [GlobalFitter::request_fit] followed by
    /// [GlobalFitter::solve].
    pub fn fit(
        &mut self,
        p0: Option<BroadcastSpec<f64>>,
        bounds: Option<BoundsSpec>,
    ) -> Result<&FitResult, GlobalFitError> {
        self.request_fit(p0, bounds)?;
        self.solve()
    }

    /// Validate `p0` and `bounds` and move to [FitState::FitRequested]
    ///
    /// Nothing changes if the validation fails.
    pub fn request_fit(
        &mut self,
        p0: Option<BroadcastSpec<f64>>,
        bounds: Option<BoundsSpec>,
    ) -> Result<(), GlobalFitError> {
        let (nsets, npar) = (self.nsets(), self.npar());
        let p0 = match p0 {
            Some(p0) => p0.expand("p0", nsets, npar)?,
            None => Array2::ones((nsets, npar)),
        };
        let (lower, upper) = bounds.unwrap_or_default().expand(nsets, npar)?;
        let x0 = flatten(&self.links, &p0);
        let lower = flatten(&self.links, &lower);
        let upper = flatten(&self.links, &upper);
        check_bounds(self.links.nfree(), x0.view(), lower.view(), upper.view())?;

        let objective = GlobalObjective::new(&self.links, p0.clone(), &self.datasets, &self.models);
        let cost = LeastSquares::new(objective, &self.data);
        ChiSquaredEvaluator::new(&cost, &self.spec).check_dof()?;
        // evaluate every model once, so shape errors are not reported as convergence failures
        cost.objective().eval(x0.view())?;

        self.request = Some(FitRequest {
            p0,
            x0,
            lower,
            upper,
        });
        self.state = FitState::FitRequested;
        Ok(())
    }

    /// Run the backend on the requested fit
    ///
    /// Only allowed in [FitState::FitRequested], ends in [FitState::Fitted] or
    /// [FitState::Failed].
    pub fn solve(&mut self) -> Result<&FitResult, GlobalFitError> {
        let FitRequest {
            p0,
            x0,
            lower,
            upper,
        } = match (&self.state, self.request.take()) {
            (FitState::FitRequested, Some(request)) => request,
            (state, _) => {
                return Err(StateError {
                    state: state.name(),
                }
                .into());
            }
        };
        self.state = FitState::Solving;

        let objective = GlobalObjective::new(&self.links, p0.clone(), &self.datasets, &self.models);
        let problem = CurveFitProblem {
            cost: LeastSquares::new(objective, &self.data),
            x0,
            lower,
            upper,
        };
        let raw = match self.algorithm.curve_fit(&problem) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("global fit failed: {err}");
                self.state = FitState::Failed(err.clone().into());
                return Err(err.into());
            }
        };

        let inflator = ResultInflator::new(&self.links, &p0);
        let par_runwise = inflator.parameters(raw.x.view());
        let evaluator = ChiSquaredEvaluator::new(&problem.cost, &self.spec);
        let (chi_global, chi_per_dataset) = match evaluator.evaluate(raw.x.view(), &par_runwise) {
            Ok(chi) => chi,
            Err(err) => {
                self.state = FitState::Failed(err.clone());
                return Err(err);
            }
        };
        info!(
            "global fit converged in {} iterations, reduced chi2 = {}",
            raw.niterations, chi_global
        );
        self.state = FitState::Fitted(inflator.inflate(raw, chi_global, chi_per_dataset));
        Ok(self.result()?)
    }

    /// Result of the last successful fit
    pub fn result(&self) -> Result<&FitResult, StateError> {
        match &self.state {
            FitState::Fitted(result) => Ok(result),
            state => Err(StateError {
                state: state.name(),
            }),
        }
    }

    /// Global and per-dataset reduced chi-squared
    pub fn get_chi(&self) -> Result<(f64, Array1<f64>), GlobalFitError> {
        let result = self.result()?;
        Ok((result.chi_global, result.chi_per_dataset.clone()))
    }

    /// `(par_runwise, cov_runwise, std_runwise)`, `std_runwise` is NaN at fixed slots
    pub fn get_par(&self) -> Result<(Array2<f64>, Array3<f64>, Array2<f64>), GlobalFitError> {
        let result = self.result()?;
        Ok((
            result.par_runwise.clone(),
            result.cov_runwise.clone(),
            result.std_runwise(),
        ))
    }

    /// Fitted model of dataset `i` sampled uniformly over the dataset's `x` range
    ///
    /// `npoints` defaults to [DEFAULT_CURVE_POINTS].
    pub fn model_curve(
        &self,
        i: usize,
        npoints: Option<usize>,
    ) -> Result<(Array1<f64>, Array1<f64>), GlobalFitError> {
        let result = self.result()?;
        let dataset = self
            .datasets
            .get(i)
            .ok_or(ConfigurationError::DatasetIndex {
                index: i,
                nsets: self.nsets(),
            })?;
        let (min, max) = dataset
            .x
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &x| {
                (min.min(x), max.max(x))
            });
        let x = Array1::linspace(min, max, npoints.unwrap_or(DEFAULT_CURVE_POINTS));
        let objective = GlobalObjective::new(
            &self.links,
            result.par_runwise.clone(),
            &self.datasets,
            &self.models,
        );
        let params = result.par_runwise.row(i).to_vec();
        let y = objective.eval_at(i, x.view(), &params)?;
        Ok((x, y))
    }
}

fn check_bounds(
    nfree: usize,
    x0: ArrayView1<f64>,
    lower: ArrayView1<f64>,
    upper: ArrayView1<f64>,
) -> Result<(), BoundsError> {
    let lengths = [
        ("p0", x0.len()),
        ("lower bounds", lower.len()),
        ("upper bounds", upper.len()),
    ];
    for (name, actual) in lengths {
        if actual != nfree {
            return Err(BoundsError::FreeLength {
                name,
                expected: nfree,
                actual,
            });
        }
    }
    let mut result = Ok(());
    Zip::indexed(x0)
        .and(lower)
        .and(upper)
        .for_each(|index, &value, &lower, &upper| {
            if result.is_err() {
                return;
            }
            if lower > upper {
                result = Err(BoundsError::Inverted {
                    index,
                    lower,
                    upper,
                });
            } else if lower == upper {
                result = Err(BoundsError::Collapsed {
                    index,
                    value: lower,
                });
            } else if !(lower..=upper).contains(&value) {
                result = Err(BoundsError::OutOfBounds {
                    index,
                    value,
                    lower,
                    upper,
                });
            }
        });
    result
}
