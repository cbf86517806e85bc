use meshpower::{
    BoundaryPolicy, EdgeSpec, Estimator, EstimatorConfig, Interlacing, LineOfSight, Resampler,
    SerialComm, ShotNoise,
};

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("estimator.json");
    std::fs::write(
        &path,
        r#"{
            "nmesh": 128,
            "boxpad": 1.5,
            "resampler": "tsc",
            "interlacing": "two_shift",
            "k_edges": {"arange": {"start": 0.01, "stop": 1.0, "step": 0.005}},
            "mu_edges": {"linspace": {"start": 0.0, "stop": 1.0, "num": 21}},
            "ells": [0, 2, 4],
            "los": "first_point",
            "bias": 1.99,
            "growth_rate": 0.83,
            "auto_shotnoise": "estimate"
        }"#,
    )
    .unwrap();
    let config = EstimatorConfig::from_path(&path).unwrap();
    assert_eq!(config.nmesh, 128);
    assert_eq!(config.resampler, Resampler::Tsc);
    assert_eq!(config.interlacing, Interlacing::TwoShift);
    assert_eq!(config.boundary, BoundaryPolicy::Periodic);
    assert_eq!(config.los, LineOfSight::FirstPoint);
    assert_eq!(config.auto_shotnoise, ShotNoise::Estimate);
    assert_eq!(config.growth_rate, Some(0.83));
    assert_eq!(config.k_edges().unwrap().len(), 198);

    let comm = SerialComm::new();
    let estimator = Estimator::new(&comm, config.clone()).unwrap();
    assert_eq!(estimator.config(), &config);
}

#[test]
fn estimator_rejects_invalid_configurations() {
    let comm = SerialComm::new();
    let mut config = EstimatorConfig::new(16, 1.0);
    config.k_edges = EdgeSpec::Explicit(vec![0.3, 0.2, 0.1]);
    assert!(Estimator::new(&comm, config).is_err());

    let mut config = EstimatorConfig::new(16, 1.0);
    config.division_floor = -1.0;
    assert!(Estimator::new(&comm, config).is_err());

    assert!(Estimator::new(&comm, EstimatorConfig::new(15, 1.0)).is_err());
    assert!(Estimator::new(&comm, EstimatorConfig::new(16, f64::NAN)).is_err());
}
