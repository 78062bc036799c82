use global_curve_fit::ndarray::{Array1, ArrayView1, array};
use global_curve_fit::params::{flatten, inflate};
use global_curve_fit::{
    BoundsError, BoundsSpec, BroadcastSpec, ConfigurationError, CurveFitAlgorithm, DataError,
    ErrorKind, FitState, GlobalFitError, GlobalFitter, LinkTable, LmCurveFit, MigradCurveFit,
    Model, ParameterSpec, RawDataset, StateError,
};
use global_curve_fit_test_util::{
    line_model, lorentzian_model, lorentzian_peaks, relaxation_model, relaxation_series,
    shared_intercept_lines,
};

use approx::assert_abs_diff_eq;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn backends() -> Vec<CurveFitAlgorithm> {
    vec![
        LmCurveFit::default().into(),
        MigradCurveFit::new(1000, 1e-4, true).into(),
    ]
}

fn two_lines() -> Vec<RawDataset> {
    vec![
        RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0, 4.0]).with_dy(vec![1.0; 4]),
        RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 3.0, 5.0]).with_dy(vec![1.0; 3]),
    ]
}

#[test]
fn nfree_counts_shared_once() {
    let datasets = vec![
        RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]),
        RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]),
    ];
    let model = Model::pointwise(|x, p, _| p[0] + p[1] * x + p[2] * x * x);
    let fitter = GlobalFitter::new(
        datasets,
        model,
        vec![true, false, false],
        None,
        CurveFitAlgorithm::default(),
    )
    .unwrap();
    assert_eq!(fitter.nfree(), 1 + 2 + 2);
    assert!(matches!(fitter.state(), FitState::Constructed));
}

#[test]
fn flatten_inflate_round_trip() {
    let fixed = BroadcastSpec::PerDatasetPerParameter(vec![
        vec![false, true, false],
        vec![false, false, false],
        vec![false, false, true],
    ]);
    let spec = ParameterSpec::new(3, vec![true, false, false], Some(fixed)).unwrap();
    let links = LinkTable::resolve(&spec);
    assert_eq!(links.nfree(), 5);

    let m = array![[1.0, 2.0, 3.0], [1.0, 5.0, 6.0], [1.0, 8.0, 9.0]];
    assert_eq!(inflate(&links, flatten(&links, &m).view(), &m), m);

    let v = array![10.0, 20.0, 30.0, 40.0, 50.0];
    assert_eq!(flatten(&links, &inflate(&links, v.view(), &m)), v);
}

#[test]
fn shared_intercept_of_two_lines() {
    init_logger();
    for algorithm in backends() {
        let mut fitter =
            GlobalFitter::new(two_lines(), line_model(), vec![true, false], None, algorithm)
                .unwrap();
        let result = fitter.fit(None, None).unwrap();

        assert_eq!(result.par_runwise[[0, 0]], result.par_runwise[[1, 0]]);
        assert_eq!(result.cov_runwise[[0, 0, 0]], result.cov_runwise[[1, 0, 0]]);
        assert_abs_diff_eq!(result.par_runwise, array![[1.0, 1.0], [1.0, 2.0]], epsilon = 1e-3);
        assert!(result.cov_runwise[[0, 0, 0]] > 0.0);
    }
}

#[test]
fn perfect_fit_has_zero_chi() {
    for algorithm in backends() {
        let mut fitter =
            GlobalFitter::new(two_lines(), line_model(), vec![true, false], None, algorithm)
                .unwrap();
        fitter.fit(None, None).unwrap();
        let (chi_global, chi_per_dataset) = fitter.get_chi().unwrap();
        assert_abs_diff_eq!(chi_global, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(chi_per_dataset, Array1::<f64>::zeros(2), epsilon = 1e-4);
    }
}

#[test]
fn noisy_lines_agree_between_backends() {
    init_logger();
    let datasets = shared_intercept_lines(3.0, &[0.5, 1.0, 1.5], 50, 0.5, 42);
    let results: Vec<_> = backends()
        .into_iter()
        .map(|algorithm| {
            let mut fitter = GlobalFitter::new(
                datasets.clone(),
                line_model(),
                vec![true, false],
                None,
                algorithm,
            )
            .unwrap();
            fitter.fit(None, None).unwrap().clone()
        })
        .collect();

    for result in &results {
        assert_abs_diff_eq!(result.par_runwise[[0, 0]], 3.0, epsilon = 0.5);
        assert_abs_diff_eq!(
            result.par_runwise.column(1),
            array![0.5, 1.0, 1.5].view(),
            epsilon = 0.2
        );
        for i in 1..3 {
            assert_eq!(result.par_runwise[[i, 0]], result.par_runwise[[0, 0]]);
            assert_eq!(result.cov_runwise[[i, 0, 0]], result.cov_runwise[[0, 0, 0]]);
        }
    }
    assert_abs_diff_eq!(results[0].par, results[1].par, epsilon = 1e-3);
    assert_abs_diff_eq!(results[0].chi_global, results[1].chi_global, epsilon = 1e-3);
}

#[test]
fn fixed_baseline_keeps_initial_value() {
    init_logger();
    let peaks = [(5.0, -2.0), (3.0, 0.5), (8.0, 1.5)];
    let datasets = lorentzian_peaks(1.2, &peaks, 0.05, 200, 0.1, 7);
    let p0 = BroadcastSpec::PerDatasetPerParameter(vec![
        vec![4.0, -1.5, 1.0, 0.05],
        vec![4.0, 0.0, 1.0, 0.05],
        vec![7.0, 1.0, 1.0, 0.05],
    ]);
    let bounds = BoundsSpec::new(
        vec![0.0, -10.0, 0.1, f64::NEG_INFINITY],
        vec![f64::INFINITY, 10.0, 10.0, f64::INFINITY],
    );
    for algorithm in backends() {
        let mut fitter = GlobalFitter::new(
            datasets.clone(),
            lorentzian_model(),
            vec![false, false, true, false],
            Some(vec![false, false, false, true].into()),
            algorithm,
        )
        .unwrap();
        assert_eq!(fitter.nfree(), 3 * 2 + 1);
        fitter.fit(Some(p0.clone()), Some(bounds.clone())).unwrap();
        let result = fitter.result().unwrap();

        for i in 0..3 {
            assert_eq!(result.par_runwise[[i, 3]], 0.05);
            assert_eq!(result.std_low_runwise[[i, 3]], 0.0);
            assert_eq!(result.std_high_runwise[[i, 3]], 0.0);
            for a in 0..4 {
                assert!(result.cov_runwise[[i, 3, a]].is_nan());
                assert!(result.cov_runwise[[i, a, 3]].is_nan());
            }
            assert_abs_diff_eq!(result.par_runwise[[i, 1]], peaks[i].1, epsilon = 0.1);
        }
        assert_abs_diff_eq!(result.par_runwise[[2, 2]], 1.2, epsilon = 0.1);

        let (_, _, std_runwise) = fitter.get_par().unwrap();
        assert!(std_runwise[[0, 3]].is_nan());
        assert!(std_runwise[[0, 2]] > 0.0);
    }
}

#[test]
fn relaxation_with_temperature_metadata() {
    init_logger();
    let datasets = relaxation_series(2.0, 0.5, &[1.0, 2.0, 3.0], 50, 0.01, 3);
    let fixed = BroadcastSpec::PerDatasetPerParameter(vec![
        vec![false, false],
        vec![true, false],
        vec![false, false],
    ]);
    let p0 = BroadcastSpec::PerDatasetPerParameter(vec![
        vec![1.0, 1.0],
        vec![2.0, 1.0],
        vec![1.0, 1.0],
    ]);
    let bounds = BoundsSpec::new(0.0, f64::INFINITY);
    for algorithm in backends() {
        let mut fitter = GlobalFitter::new(
            datasets.clone(),
            relaxation_model(),
            vec![false, true],
            Some(fixed.clone()),
            algorithm,
        )
        .unwrap();
        let result = fitter.fit(Some(p0.clone()), Some(bounds.clone())).unwrap();
        assert_eq!(result.par_runwise[[1, 0]], 2.0);
        assert_abs_diff_eq!(
            result.par_runwise.column(1),
            Array1::from_elem(3, 0.5).view(),
            epsilon = 0.02
        );
        assert_abs_diff_eq!(result.par_runwise[[0, 0]], 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(result.par_runwise[[2, 0]], 2.0, epsilon = 0.05);
    }
}

#[test]
fn shared_and_fixed_is_rejected() {
    let err = GlobalFitter::new(
        two_lines(),
        line_model(),
        vec![true, false],
        Some(BroadcastSpec::PerDatasetPerParameter(vec![
            vec![false, false],
            vec![true, false],
        ])),
        CurveFitAlgorithm::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(
        err,
        ConfigurationError::SharedAndFixed {
            dataset: 1,
            parameter: 0
        }
        .into()
    );
}

#[test]
fn zero_error_points_are_dropped() {
    let dataset = RawDataset::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0])
        .with_dy(vec![0.1, 0.0, 0.1])
        .prepare(0)
        .unwrap();
    assert_eq!(dataset.x, array![0.0, 2.0]);
    assert_eq!(dataset.y, array![1.0, 3.0]);

    let err = RawDataset::new(vec![0.0, 1.0], vec![1.0, 2.0])
        .with_dy(vec![0.0, 0.0])
        .prepare(3)
        .unwrap_err();
    assert_eq!(err, DataError::EmptyDataset { dataset: 3 }.into());
}

#[test]
fn accessors_require_a_fit() {
    let mut fitter = GlobalFitter::new(
        two_lines(),
        line_model(),
        vec![true, false],
        None,
        LmCurveFit::default().into(),
    )
    .unwrap();
    assert_eq!(
        fitter.result().unwrap_err(),
        StateError {
            state: "Constructed"
        }
    );
    assert_eq!(fitter.get_chi().unwrap_err().kind(), ErrorKind::State);
    assert_eq!(fitter.get_par().unwrap_err().kind(), ErrorKind::State);
    assert_eq!(fitter.model_curve(0, None).unwrap_err().kind(), ErrorKind::State);

    fitter.fit(None, None).unwrap();
    let (x, y) = fitter.model_curve(1, None).unwrap();
    assert_eq!(x.len(), 500);
    assert_abs_diff_eq!(x[0], 0.0);
    assert_abs_diff_eq!(x[499], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(y, 1.0 + 2.0 * &x, epsilon = 1e-4);
    assert_eq!(
        fitter.model_curve(2, Some(10)).unwrap_err(),
        ConfigurationError::DatasetIndex { index: 2, nsets: 2 }.into()
    );
}

#[test]
fn failed_fit_is_reported_in_state() {
    let datasets = vec![RawDataset::new(
        vec![0.0, 1.0, 2.0, 3.0],
        vec![1.0, 3.2, 4.9, 7.1],
    )];
    let model = Model::pointwise(|x, p, _| p[0] * f64::exp(p[1] * x));
    let mut fitter = GlobalFitter::new(
        datasets,
        model,
        vec![false, false],
        None,
        LmCurveFit::new(1, 1e-12, 100.0).into(),
    )
    .unwrap();
    let err = fitter
        .fit(Some(BroadcastSpec::Scalar(0.1)), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Convergence);
    assert!(matches!(fitter.state(), FitState::Failed(_)));
    assert_eq!(fitter.result().unwrap_err(), StateError { state: "Failed" });
}

#[test]
fn invalid_input_leaves_state_untouched() {
    let mut fitter = GlobalFitter::new(
        two_lines(),
        line_model(),
        vec![true, false],
        None,
        LmCurveFit::default().into(),
    )
    .unwrap();
    fitter.fit(None, None).unwrap();

    let err = fitter
        .fit(
            Some(vec![1.0, 5.0].into()),
            Some(BoundsSpec::new(0.0, vec![10.0, 3.0])),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bounds);
    assert!(matches!(err, GlobalFitError::Bounds(BoundsError::OutOfBounds { .. })));
    assert!(matches!(fitter.state(), FitState::Fitted(_)));

    let err = fitter
        .fit(Some(vec![1.0, 2.0, 3.0].into()), None)
        .unwrap_err();
    assert!(matches!(
        err,
        GlobalFitError::Configuration(ConfigurationError::WrongShape { name: "p0", .. })
    ));
    assert!(fitter.result().is_ok());
}

#[test]
fn collapsed_bounds_of_a_shared_slot_are_rejected() {
    init_logger();
    for algorithm in backends() {
        let mut fitter =
            GlobalFitter::new(two_lines(), line_model(), vec![true, false], None, algorithm)
                .unwrap();
        let err = fitter
            .fit(
                Some(BroadcastSpec::Scalar(1.0)),
                Some(BoundsSpec::new(vec![1.0, f64::NEG_INFINITY], vec![1.0, f64::INFINITY])),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds);
        assert_eq!(
            err,
            BoundsError::Collapsed {
                index: 0,
                value: 1.0
            }
            .into()
        );
        assert!(matches!(fitter.state(), FitState::Constructed));

        // fixing the intercept instead is the supported way
        let fixed = BroadcastSpec::PerParameter(vec![true, false]);
        let mut fitter = GlobalFitter::new(
            two_lines(),
            line_model(),
            vec![false, false],
            Some(fixed),
            fitter.algorithm().clone(),
        )
        .unwrap();
        let result = fitter.fit(Some(BroadcastSpec::Scalar(1.0)), None).unwrap();
        assert_eq!(result.par_runwise.column(0).to_vec(), vec![1.0, 1.0]);
    }
}

#[test]
fn requested_fit_is_observable() {
    let mut fitter = GlobalFitter::new(
        two_lines(),
        line_model(),
        vec![true, false],
        None,
        CurveFitAlgorithm::default(),
    )
    .unwrap();
    fitter.request_fit(None, None).unwrap();
    assert!(matches!(fitter.state(), FitState::FitRequested));
    assert_eq!(
        fitter.get_par().unwrap_err(),
        StateError {
            state: "FitRequested"
        }
        .into()
    );
    let result = fitter.solve().unwrap();
    assert!(result.chi_global < 1e-2);
    assert!(matches!(fitter.state(), FitState::Fitted(_)));
}

#[test]
fn model_errors_are_found_before_solving() {
    let short = Model::new(|_x: ArrayView1<f64>, _p: &[f64], _md: &[f64]| array![1.0]);
    let mut fitter = GlobalFitter::new(
        two_lines(),
        vec![line_model(), short],
        vec![false, false],
        None,
        CurveFitAlgorithm::default(),
    )
    .unwrap();
    assert_eq!(
        fitter.fit(None, None).unwrap_err(),
        ConfigurationError::ModelOutputLength {
            dataset: 1,
            expected: 3,
            actual: 1
        }
        .into()
    );
    assert!(matches!(fitter.state(), FitState::Constructed));

    let datasets = vec![RawDataset::new(vec![1.0, 2.0], vec![1.0, 2.0])];
    let mut fitter = GlobalFitter::new(
        datasets,
        line_model(),
        vec![false, false],
        None,
        CurveFitAlgorithm::default(),
    )
    .unwrap();
    assert_eq!(fitter.fit(None, None).unwrap_err().kind(), ErrorKind::Data);
}

#[test]
fn configuration_from_json() {
    let algorithm: CurveFitAlgorithm = serde_json::from_str(
        r#"{"Migrad": {"niterations": 500, "tolerance": 0.01, "minos": false}}"#,
    )
    .unwrap();
    assert!(matches!(
        &algorithm,
        CurveFitAlgorithm::Migrad(m) if *m == MigradCurveFit::new(500, 0.01, false)
    ));

    let p0: BroadcastSpec<f64> = serde_json::from_str("[[1.0, 1.0], [1.0, 2.0]]").unwrap();
    let bounds: BoundsSpec =
        serde_json::from_str(r#"{"lower": -100.0, "upper": [100.0, 10.0]}"#).unwrap();
    let mut fitter =
        GlobalFitter::new(two_lines(), line_model(), vec![true, false], None, algorithm).unwrap();
    let result = fitter.fit(Some(p0), Some(bounds)).unwrap();

    let json = serde_json::to_value(result).unwrap();
    assert_eq!(json["par_runwise"]["dim"], serde_json::json!([2, 2]));
    assert!(json["chi_global"].as_f64().unwrap() < 1e-3);
}

#[test]
fn unit_weights_without_errors() {
    let datasets = vec![
        RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0, 4.0]),
        RawDataset::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0, 5.0]),
    ];
    let mut fitter = GlobalFitter::new(
        datasets,
        line_model(),
        vec![false, true],
        None,
        LmCurveFit::default().into(),
    )
    .unwrap();
    let result = fitter.fit(None, None).unwrap();
    // ordinary least squares with a shared slope
    assert_abs_diff_eq!(result.par_runwise[[0, 1]], 1.3, epsilon = 1e-6);
    assert_abs_diff_eq!(
        result.par_runwise.column(0),
        array![-0.2, 0.8].view(),
        epsilon = 1e-6
    );
}
