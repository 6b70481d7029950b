//! Synthetic city-year income panels and a model evaluation study on top of
//! them.
//!
//! The crate has two halves. [`generator`] draws a panel of simulated
//! economic indicators for cities in three regions. The evaluator splits
//! that panel, standardizes the covariates on the training rows, benchmarks
//! several regressors on held-out rural income, attributes predictions to
//! features, refits per-region models and runs a counterfactual policy
//! scenario.
//!
//! # Example
//!
//! ```ignore
//! use panel_income::{generate_panel, IncomeStudyBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let df = generate_panel(42, 100, 2018..=2022)?;
//!     let results = IncomeStudyBuilder::new(df)
//!         .split_seed(0)
//!         .permutations(16)
//!         .run()?;
//!
//!     results.summary();
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;

use comfy_table::{Cell, Table};
use getset::Getters;
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub mod attribution;
pub mod data;
pub mod generator;
pub mod harness;
pub mod math;
pub mod models;
pub mod policy;
pub mod regional;

pub use crate::attribution::{AttributionReport, FeatureImportance, ShapleyExplainer};
pub use crate::data::{feature_matrix, filter_region, target_vector, train_test_split, Partition};
pub use crate::generator::{
    generate_panel, Gaussian, PanelConfig, Region, RegionProfile, RegionSpec, COVARIATES,
    RURAL_INCOME, URBAN_INCOME,
};
pub use crate::harness::{benchmark_models, fit_and_score, prepare, ModelBenchmark, PreparedData};
pub use crate::math::scaler::StandardScaler;
pub use crate::models::{ModelKind, Regressor, RidgeRegression};
pub use crate::policy::{PolicyOutcome, PolicyScenario};
pub use crate::regional::{RegionalAnalysis, RegionalScore, MIN_REGION_ROWS};

/// Error type for the `panel_income` library.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
    /// A model variant was requested whose Cargo feature is disabled.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    #[error("Model not fitted: {0}")]
    NotFitted(String),
    #[error("Data quality error: {0}")]
    DataQuality(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// A linear algebra failure, such as a matrix that is not positive
    /// definite.
    #[error("Nalgebra error: {0}")]
    Nalgebra(String),
    #[error("Chart error: {0}")]
    Chart(String),
}

/// The main entry point for configuring and running the income study.
#[derive(Debug, Clone)]
pub struct IncomeStudyBuilder {
    dataframe: DataFrame,
    target: String,
    covariates: Vec<String>,
    test_fraction: f64,
    split_seed: u64,
    model_seed: u64,
    models: Vec<ModelKind>,
    attribution_model: ModelKind,
    permutations: usize,
    max_explained_rows: usize,
    regional_seed: Option<u64>,
    skip_regional: bool,
    policy_scenario: PolicyScenario,
    policy_model: ModelKind,
}

impl IncomeStudyBuilder {
    /// Creates a builder for `dataframe` with rural income as the target and
    /// the eight panel covariates.
    pub fn new(dataframe: DataFrame) -> Self {
        Self {
            dataframe,
            target: RURAL_INCOME.to_string(),
            covariates: COVARIATES.iter().map(|c| c.to_string()).collect(),
            test_fraction: 0.2,
            split_seed: 0,
            model_seed: 42,
            models: ModelKind::ALL.to_vec(),
            attribution_model: ModelKind::RandomForest,
            permutations: 32,
            max_explained_rows: 100,
            regional_seed: None,
            skip_regional: false,
            policy_scenario: PolicyScenario::default(),
            policy_model: ModelKind::RandomForest,
        }
    }

    pub fn target(&mut self, target: &str) -> &mut Self {
        self.target = target.to_string();
        self
    }

    /// Sets the covariates, in the column order used for every matrix.
    pub fn covariates(&mut self, covariates: &[&str]) -> &mut Self {
        self.covariates = covariates.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn test_fraction(&mut self, fraction: f64) -> &mut Self {
        self.test_fraction = fraction;
        self
    }

    /// Seeds the train/test split of the full panel. The default is 0.
    pub fn split_seed(&mut self, seed: u64) -> &mut Self {
        self.split_seed = seed;
        self
    }

    /// Seeds the randomized models and the attribution sampler.
    pub fn model_seed(&mut self, seed: u64) -> &mut Self {
        self.model_seed = seed;
        self
    }

    /// Models to benchmark, reported in this order.
    pub fn models(&mut self, models: &[ModelKind]) -> &mut Self {
        self.models = models.to_vec();
        self
    }

    pub fn attribution_model(&mut self, model: ModelKind) -> &mut Self {
        self.attribution_model = model;
        self
    }

    /// Sampled feature orderings per explained row.
    pub fn permutations(&mut self, permutations: usize) -> &mut Self {
        self.permutations = permutations;
        self
    }

    /// Caps how many test rows are explained.
    pub fn max_explained_rows(&mut self, rows: usize) -> &mut Self {
        self.max_explained_rows = rows;
        self
    }

    /// Seeds the per-region splits. Unseeded by default, so regional scores
    /// vary between runs.
    pub fn regional_seed(&mut self, seed: u64) -> &mut Self {
        self.regional_seed = Some(seed);
        self
    }

    pub fn skip_regional(&mut self, skip: bool) -> &mut Self {
        self.skip_regional = skip;
        self
    }

    pub fn policy_scenario(&mut self, scenario: PolicyScenario) -> &mut Self {
        self.policy_scenario = scenario;
        self
    }

    pub fn policy_model(&mut self, model: ModelKind) -> &mut Self {
        self.policy_model = model;
        self
    }

    fn validate(&self) -> Result<(), PanelError> {
        if self.covariates.is_empty() {
            return Err(PanelError::InvalidParameter(
                "at least one covariate is required".to_string(),
            ));
        }
        if self.models.is_empty() {
            return Err(PanelError::InvalidParameter(
                "at least one model is required".to_string(),
            ));
        }
        if self.max_explained_rows == 0 {
            return Err(PanelError::InvalidParameter(
                "max_explained_rows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Runs the benchmark, attribution, regional and policy stages in order.
    pub fn run(&self) -> Result<StudyResults, PanelError> {
        self.validate()?;
        info!(
            rows = self.dataframe.height(),
            target = %self.target,
            "starting income study"
        );

        let prepared = prepare(
            &self.dataframe,
            &self.covariates,
            &self.target,
            self.test_fraction,
            self.split_seed,
        )?;

        let mut fitted: HashMap<ModelKind, Box<dyn Regressor>> = HashMap::new();
        let mut benchmarks = Vec::with_capacity(self.models.len());
        for &kind in &self.models {
            let (model, benchmark) = fit_and_score(kind, &prepared, self.model_seed)?;
            benchmarks.push(benchmark);
            fitted.insert(kind, model);
        }
        for kind in [self.attribution_model, self.policy_model] {
            if !fitted.contains_key(&kind) {
                let (model, _) = fit_and_score(kind, &prepared, self.model_seed)?;
                fitted.insert(kind, model);
            }
        }
        let model_for = |kind: ModelKind| {
            fitted
                .get(&kind)
                .map(|m| &**m)
                .ok_or_else(|| PanelError::NotFitted(kind.to_string()))
        };

        let explained = prepared.x_test.nrows().min(self.max_explained_rows);
        let attribution = ShapleyExplainer::new(self.permutations, self.model_seed).explain(
            model_for(self.attribution_model)?,
            &prepared.x_test.rows(0, explained).into_owned(),
            &prepared.x_train,
            &self.covariates,
        )?;

        let regional = if self.skip_regional {
            Vec::new()
        } else {
            RegionalAnalysis {
                covariates: self.covariates.clone(),
                target: self.target.clone(),
                test_fraction: self.test_fraction,
                model: ModelKind::RandomForest,
                model_seed: self.model_seed,
                split_seed: self.regional_seed,
            }
            .run(&self.dataframe, &Region::ALL)?
        };

        let policy = self.policy_scenario.simulate(
            &prepared.partition.test,
            &prepared.scaler,
            model_for(self.policy_model)?,
        )?;

        Ok(StudyResults {
            target: self.target.clone(),
            covariates: self.covariates.clone(),
            n_train: prepared.x_train.nrows(),
            n_test: prepared.x_test.nrows(),
            scaler: prepared.scaler,
            benchmarks,
            attribution,
            regional,
            policy,
        })
    }
}

/// Everything one study run produced.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct StudyResults {
    target: String,
    covariates: Vec<String>,
    n_train: usize,
    n_test: usize,
    #[serde(skip)]
    scaler: StandardScaler,
    benchmarks: Vec<ModelBenchmark>,
    attribution: AttributionReport,
    regional: Vec<RegionalScore>,
    policy: PolicyOutcome,
}

impl StudyResults {
    /// The benchmark entry for `kind`, if it was benchmarked.
    pub fn benchmark(&self, kind: ModelKind) -> Option<&ModelBenchmark> {
        self.benchmarks.iter().find(|b| b.model == kind)
    }

    /// Prints the study results to the console.
    pub fn summary(&self) {
        println!("Rural Income Model Study");
        println!("========================================");
        println!("Target: {}", self.target);
        println!("Train rows: {}  Test rows: {}", self.n_train, self.n_test);
        println!();

        let mut bench_table = Table::new();
        bench_table.set_header(vec!["Model", "RMSE", "R²", "Train time (s)"]);
        for b in &self.benchmarks {
            bench_table.add_row(vec![
                Cell::new(b.model),
                Cell::new(format!("{:.2}", b.rmse)),
                Cell::new(format!("{:.4}", b.r2)),
                Cell::new(format!("{:.3}", b.train_time.as_secs_f64())),
            ]);
        }
        println!("Held-out Performance");
        println!("{}", bench_table);

        println!(
            "\nFeature Attribution ({}, {} rows)",
            self.attribution.model(),
            self.attribution.predictions().len()
        );
        println!("{}", self.attribution.table());

        if !self.regional.is_empty() {
            let mut regional_table = Table::new();
            regional_table.set_header(vec!["Region", "Rows", "Train", "Test", "R²", "RMSE"]);
            for r in &self.regional {
                regional_table.add_row(vec![
                    Cell::new(r.region),
                    Cell::new(r.n_rows),
                    Cell::new(r.n_train),
                    Cell::new(r.n_test),
                    Cell::new(format!("{:.4}", r.r2)),
                    Cell::new(format!("{:.2}", r.rmse)),
                ]);
            }
            println!("\nRegional Models");
            println!("{}", regional_table);
        }

        let p = &self.policy;
        let mut policy_table = Table::new();
        policy_table.set_header(vec!["Scenario", "Model", "Baseline", "Counterfactual", "Change"]);
        policy_table.add_row(vec![
            Cell::new(format!("{} {:+}", p.scenario.column, p.scenario.delta)),
            Cell::new(&p.model),
            Cell::new(format!("{:.2}", p.baseline_mean)),
            Cell::new(format!("{:.2}", p.counterfactual_mean)),
            Cell::new(format!("{:+.2}", p.mean_delta)),
        ]);
        println!("\nPolicy Simulation ({} test rows)", p.rows);
        println!("{}", policy_table);
    }

    /// Exports the results to Markdown tables.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("### Held-out Performance\n\n");
        md.push_str("| Model | RMSE | R² | Train time (s) |\n");
        md.push_str("|---|---|---|---|\n");
        for b in &self.benchmarks {
            md.push_str(&format!(
                "| {} | {:.2} | {:.4} | {:.3} |\n",
                b.model,
                b.rmse,
                b.r2,
                b.train_time.as_secs_f64()
            ));
        }

        md.push_str(&format!(
            "\n### Feature Attribution ({})\n\n",
            self.attribution.model()
        ));
        md.push_str("| Rank | Feature | Mean abs. contribution | Mean contribution |\n");
        md.push_str("|---|---|---|---|\n");
        for (i, f) in self.attribution.ranking().iter().enumerate() {
            md.push_str(&format!(
                "| {} | {} | {:.2} | {:+.2} |\n",
                i + 1,
                f.feature(),
                f.mean_abs(),
                f.mean()
            ));
        }

        if !self.regional.is_empty() {
            md.push_str("\n### Regional Models\n\n");
            md.push_str("| Region | Rows | R² | RMSE |\n");
            md.push_str("|---|---|---|---|\n");
            for r in &self.regional {
                md.push_str(&format!(
                    "| {} | {} | {:.4} | {:.2} |\n",
                    r.region, r.n_rows, r.r2, r.rmse
                ));
            }
        }

        let p = &self.policy;
        md.push_str("\n### Policy Simulation\n\n");
        md.push_str("| Scenario | Baseline | Counterfactual | Change |\n");
        md.push_str("|---|---|---|---|\n");
        md.push_str(&format!(
            "| {} {:+} | {:.2} | {:.2} | {:+.2} |\n",
            p.scenario.column, p.scenario.delta, p.baseline_mean, p.counterfactual_mean, p.mean_delta
        ));
        md
    }

    /// Exports the results to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
