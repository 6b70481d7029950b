use panel_income::{
    generate_panel, prepare, IncomeStudyBuilder, ModelKind, PanelError, PolicyScenario, Region,
    StandardScaler, StudyResults, COVARIATES, RURAL_INCOME,
};
use polars::prelude::*;

fn panel() -> DataFrame {
    generate_panel(42, 100, 2018..=2022).expect("panel generation failed")
}

fn ridge_only(df: DataFrame) -> StudyResults {
    IncomeStudyBuilder::new(df)
        .models(&[ModelKind::Ridge])
        .attribution_model(ModelKind::Ridge)
        .policy_model(ModelKind::Ridge)
        .permutations(8)
        .skip_regional(true)
        .run()
        .expect("study failed")
}

#[cfg(all(feature = "forest", feature = "boosting"))]
#[test]
fn test_full_study_with_default_models() {
    let results = IncomeStudyBuilder::new(panel())
        .permutations(4)
        .max_explained_rows(20)
        .regional_seed(1)
        .run()
        .expect("study failed");

    assert_eq!(*results.n_train(), 400);
    assert_eq!(*results.n_test(), 100);

    let models: Vec<ModelKind> = results.benchmarks().iter().map(|b| b.model).collect();
    assert_eq!(models, ModelKind::ALL.to_vec());
    for b in results.benchmarks() {
        assert!(b.r2 <= 1.0);
        assert!(b.rmse > 0.0);
    }

    let ranking = results.attribution().ranking();
    assert_eq!(ranking.len(), COVARIATES.len());
    assert!(ranking.windows(2).all(|w| w[0].mean_abs() >= w[1].mean_abs()));
    assert_eq!(results.attribution().model(), "RandomForest");

    let regions: Vec<Region> = results.regional().iter().map(|r| r.region).collect();
    assert_eq!(regions, Region::ALL.to_vec());
    let east = &results.regional()[0];
    assert!(east.r2 <= 1.0);
    assert!(east.n_rows >= 10);

    assert_eq!(results.policy().model, "RandomForest");
    assert_eq!(results.policy().rows, 100);

    results.summary();
}

#[test]
fn test_ridge_metrics_are_reproducible() {
    let a = ridge_only(panel());
    let b = ridge_only(panel());
    let (ra, rb) = (
        a.benchmark(ModelKind::Ridge).unwrap(),
        b.benchmark(ModelKind::Ridge).unwrap(),
    );
    assert_eq!(ra.rmse, rb.rmse);
    assert_eq!(ra.r2, rb.r2);
    assert!(ra.r2 > 0.5 && ra.r2 <= 1.0);
}

#[test]
fn test_policy_increase_raises_linear_predictions() {
    let results = ridge_only(panel());
    let policy = results.policy();
    assert_eq!(policy.scenario, PolicyScenario::default());
    assert!(policy.mean_delta > 0.0);
    assert!((policy.counterfactual_mean - policy.baseline_mean - policy.mean_delta).abs() < 1e-9);
}

#[test]
fn test_attribution_is_additive_per_row() {
    let results = ridge_only(panel());
    let report = results.attribution();
    for ((total, base), pred) in report
        .row_totals()
        .iter()
        .zip(report.base_values())
        .zip(report.predictions())
    {
        assert!((total - (pred - base)).abs() < 1e-6 * pred.abs().max(1.0));
    }
}

#[test]
fn test_pipeline_scaler_uses_training_rows_only() {
    let df = panel();
    let covariates: Vec<String> = COVARIATES.iter().map(|c| c.to_string()).collect();
    let prepared = prepare(&df, &covariates, RURAL_INCOME, 0.2, 0).unwrap();

    let refit = StandardScaler::fit_frame(&prepared.partition.train, &covariates).unwrap();
    let leaky = StandardScaler::fit_frame(&df, &covariates).unwrap();
    assert_eq!(prepared.scaler, refit);
    assert_ne!(prepared.scaler, leaky);
}

#[test]
fn test_study_does_not_modify_input_frame() {
    let df = panel();
    let before = df.clone();
    ridge_only(df.clone());
    assert!(df.equals(&before));
}

#[test]
fn test_exports_contain_every_section() {
    let results = ridge_only(panel());

    let json: serde_json::Value = serde_json::from_str(&results.to_json().unwrap()).unwrap();
    assert_eq!(json["target"], RURAL_INCOME);
    assert_eq!(json["benchmarks"][0]["model"], "Ridge");
    assert!(json["benchmarks"][0]["train_seconds"].is_number());
    assert_eq!(json["policy"]["scenario"]["column"], "policy_index");
    assert_eq!(json["attribution"]["ranking"].as_array().unwrap().len(), 8);

    let md = results.to_markdown();
    assert!(md.contains("### Held-out Performance"));
    assert!(md.contains("### Feature Attribution (Ridge)"));
    assert!(md.contains("### Policy Simulation"));
    assert!(!md.contains("### Regional Models"));
}

#[test]
fn test_builder_rejects_bad_configuration() {
    let no_models = IncomeStudyBuilder::new(panel()).models(&[]).run();
    assert!(matches!(no_models, Err(PanelError::InvalidParameter(_))));

    let missing = IncomeStudyBuilder::new(panel())
        .covariates(&["gdp_pc", "rainfall"])
        .models(&[ModelKind::Ridge])
        .run();
    match missing {
        Err(PanelError::ColumnNotFound(name)) => assert_eq!(name, "rainfall"),
        other => panic!("expected ColumnNotFound, got {:?}", other.map(|_| ())),
    }

    let bad_fraction = IncomeStudyBuilder::new(panel()).test_fraction(0.0).run();
    assert!(matches!(bad_fraction, Err(PanelError::InvalidParameter(_))));
}

#[test]
fn test_small_region_fails_regional_stage() {
    // Two cities cannot cover all three regions.
    let df = generate_panel(3, 2, 2018..=2022).unwrap();
    let result = IncomeStudyBuilder::new(df)
        .models(&[ModelKind::Ridge])
        .attribution_model(ModelKind::Ridge)
        .policy_model(ModelKind::Ridge)
        .permutations(2)
        .regional_seed(0)
        .run();
    assert!(matches!(result, Err(PanelError::DataQuality(_))));
}
