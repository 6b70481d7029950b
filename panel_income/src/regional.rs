//! Per-region models fitted on each region's rows in isolation.

use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::data::{feature_matrix, filter_region, target_vector, train_test_split};
use crate::generator::Region;
use crate::math::metrics::{r_squared, rmse};
use crate::math::scaler::StandardScaler;
use crate::models::ModelKind;
use crate::PanelError;

/// Fewest rows a region needs before it is split and fitted.
pub const MIN_REGION_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalScore {
    pub region: Region,
    pub n_rows: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub r2: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone)]
pub struct RegionalAnalysis {
    pub covariates: Vec<String>,
    pub target: String,
    pub test_fraction: f64,
    pub model: ModelKind,
    pub model_seed: u64,
    /// Seeds the per-region splits; `None` draws a fresh split each run.
    pub split_seed: Option<u64>,
}

impl RegionalAnalysis {
    /// Scores every region present in `regions`, in that order.
    pub fn run(&self, df: &DataFrame, regions: &[Region]) -> Result<Vec<RegionalScore>, PanelError> {
        let mut rng = match self.split_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        regions
            .iter()
            .map(|&region| self.score_region(df, region, &mut rng))
            .collect()
    }

    fn score_region(
        &self,
        df: &DataFrame,
        region: Region,
        rng: &mut StdRng,
    ) -> Result<RegionalScore, PanelError> {
        let rows = filter_region(df, region)?;
        if rows.height() < MIN_REGION_ROWS {
            return Err(PanelError::DataQuality(format!(
                "region {} has {} rows, at least {} are required",
                region,
                rows.height(),
                MIN_REGION_ROWS
            )));
        }

        let partition = train_test_split(&rows, self.test_fraction, rng)?;
        let raw_train = feature_matrix(&partition.train, &self.covariates)?;
        let scaler = StandardScaler::fit(&raw_train, &self.covariates)?;
        let x_train = scaler.transform(&raw_train)?;
        let x_test = scaler.transform_columns(&partition.test, &self.covariates)?;
        let y_train = target_vector(&partition.train, &self.target)?;
        let y_test = target_vector(&partition.test, &self.target)?;

        let mut model = self.model.build(self.model_seed)?;
        model.fit(&x_train, &y_train)?;
        let predictions = model.predict(&x_test)?;

        let score = RegionalScore {
            region,
            n_rows: rows.height(),
            n_train: x_train.nrows(),
            n_test: x_test.nrows(),
            r2: r_squared(&y_test, &predictions)?,
            rmse: rmse(&y_test, &predictions)?,
        };
        info!(%region, rows = score.n_rows, r2 = score.r2, "scored regional model");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{generate_panel, COVARIATES, RURAL_INCOME};
    use polars::prelude::*;

    fn analysis(model: ModelKind) -> RegionalAnalysis {
        RegionalAnalysis {
            covariates: COVARIATES.iter().map(|c| c.to_string()).collect(),
            target: RURAL_INCOME.to_string(),
            test_fraction: 0.2,
            model,
            model_seed: 42,
            split_seed: Some(0),
        }
    }

    #[test]
    fn test_every_region_is_scored() {
        let df = generate_panel(42, 100, 2018..=2022).unwrap();
        let scores = analysis(ModelKind::Ridge).run(&df, &Region::ALL).unwrap();
        assert_eq!(scores.len(), 3);
        let total: usize = scores.iter().map(|s| s.n_rows).sum();
        assert_eq!(total, 500);
        for s in &scores {
            assert_eq!(s.n_train + s.n_test, s.n_rows);
            assert!(s.r2 <= 1.0);
        }
    }

    #[test]
    fn test_seeded_runs_agree() {
        let df = generate_panel(7, 40, 2018..=2022).unwrap();
        let a = analysis(ModelKind::Ridge).run(&df, &Region::ALL).unwrap();
        let b = analysis(ModelKind::Ridge).run(&df, &Region::ALL).unwrap();
        assert_eq!(a, b);
    }

    #[cfg(feature = "forest")]
    #[test]
    fn test_forest_fits_region_at_minimum_size() {
        let df = generate_panel(42, 100, 2018..=2022).unwrap();
        let east = filter_region(&df, Region::East).unwrap();
        let forest = analysis(ModelKind::RandomForest);

        let scores = forest
            .run(&east.head(Some(MIN_REGION_ROWS)), &[Region::East])
            .unwrap();
        assert_eq!(scores[0].n_rows, 10);
        assert_eq!((scores[0].n_train, scores[0].n_test), (8, 2));
        assert!(scores[0].r2 <= 1.0);

        match forest.run(&east.head(Some(MIN_REGION_ROWS - 1)), &[Region::East]) {
            Err(PanelError::DataQuality(msg)) => assert!(msg.contains("9 rows")),
            other => panic!("expected DataQuality, got {:?}", other),
        }
    }

    #[test]
    fn test_small_region_is_rejected() {
        let df = df!(
            "region" => &["East", "East", "West"],
            "gdp_pc" => &[1.0, 2.0, 3.0],
            "rural_income" => &[1.0, 2.0, 3.0]
        )
        .unwrap();
        let mut a = analysis(ModelKind::Ridge);
        a.covariates = vec!["gdp_pc".to_string()];
        assert!(matches!(
            a.run(&df, &[Region::East]),
            Err(PanelError::DataQuality(_))
        ));
    }
}
