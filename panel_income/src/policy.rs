//! Counterfactual policy scenarios.
//!
//! A scenario shifts one covariate of a frame by a constant and compares a
//! fitted model's predictions before and after. The scaler used is the one
//! fitted during training, so the shift is measured in the original units.

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::data::f64_values;
use crate::math::scaler::StandardScaler;
use crate::models::Regressor;
use crate::PanelError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyScenario {
    pub column: String,
    pub delta: f64,
}

impl Default for PolicyScenario {
    fn default() -> Self {
        Self {
            column: "policy_index".to_string(),
            delta: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub scenario: PolicyScenario,
    pub model: String,
    pub rows: usize,
    pub baseline_mean: f64,
    pub counterfactual_mean: f64,
    pub mean_delta: f64,
}

impl PolicyScenario {
    pub fn new(column: impl Into<String>, delta: f64) -> Self {
        Self {
            column: column.into(),
            delta,
        }
    }

    /// Returns a copy of `df` with the scenario column shifted by `delta`.
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame, PanelError> {
        if !self.delta.is_finite() {
            return Err(PanelError::InvalidParameter(format!(
                "policy delta must be finite, got {}",
                self.delta
            )));
        }
        let shifted: Vec<f64> = f64_values(df, &self.column)?
            .into_iter()
            .map(|v| v + self.delta)
            .collect();
        let mut out = df.clone();
        out.with_column(Column::new(self.column.as_str().into(), shifted))?;
        Ok(out)
    }

    /// Predicts `frame` with `model` before and after the shift.
    ///
    /// Both frames are scaled with `scaler` as fitted; it is never refit.
    pub fn simulate(
        &self,
        frame: &DataFrame,
        scaler: &StandardScaler,
        model: &dyn Regressor,
    ) -> Result<PolicyOutcome, PanelError> {
        if !scaler.feature_names().contains(&self.column) {
            return Err(PanelError::ColumnNotFound(self.column.clone()));
        }
        let shifted = self.apply(frame)?;
        let baseline = model.predict(&scaler.transform_frame(frame)?)?;
        let counterfactual = model.predict(&scaler.transform_frame(&shifted)?)?;
        if baseline.is_empty() {
            return Err(PanelError::DataQuality(
                "policy simulation needs at least one row".to_string(),
            ));
        }

        let baseline_mean = baseline.mean();
        let counterfactual_mean = counterfactual.mean();
        let outcome = PolicyOutcome {
            scenario: self.clone(),
            model: model.name().to_string(),
            rows: frame.height(),
            baseline_mean,
            counterfactual_mean,
            mean_delta: counterfactual_mean - baseline_mean,
        };
        info!(
            column = %self.column,
            delta = self.delta,
            mean_delta = outcome.mean_delta,
            "simulated policy scenario"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{feature_matrix, target_vector};
    use crate::models::RidgeRegression;

    fn frame() -> DataFrame {
        let policy: Vec<f64> = (0..20).map(|i| 0.5 + 0.02 * i as f64).collect();
        let gdp: Vec<f64> = (0..20).map(|i| 40000.0 + 1000.0 * ((i * 7) % 20) as f64).collect();
        let income: Vec<f64> = policy
            .iter()
            .zip(&gdp)
            .map(|(p, g)| 0.4 * g + 5000.0 * p)
            .collect();
        df!(
            "gdp_pc" => gdp,
            "policy_index" => policy,
            "rural_income" => income
        )
        .unwrap()
    }

    fn fitted(df: &DataFrame) -> (StandardScaler, RidgeRegression) {
        let names = vec!["gdp_pc".to_string(), "policy_index".to_string()];
        let scaler = StandardScaler::fit_frame(df, &names).unwrap();
        let x = scaler.transform(&feature_matrix(df, &names).unwrap()).unwrap();
        let y = target_vector(df, "rural_income").unwrap();
        let mut model = RidgeRegression::new(0.0);
        model.fit(&x, &y).unwrap();
        (scaler, model)
    }

    #[test]
    fn test_apply_shifts_a_copy() {
        let df = frame();
        let before = df.clone();
        let shifted = PolicyScenario::default().apply(&df).unwrap();
        assert!(df.equals(&before));
        let a = f64_values(&df, "policy_index").unwrap();
        let b = f64_values(&shifted, "policy_index").unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((y - x - 0.2).abs() < 1e-12);
        }
        assert_eq!(
            f64_values(&df, "gdp_pc").unwrap(),
            f64_values(&shifted, "gdp_pc").unwrap()
        );
    }

    #[test]
    fn test_positive_coefficient_gives_positive_delta() {
        let df = frame();
        let (scaler, model) = fitted(&df);
        let before = df.clone();
        let outcome = PolicyScenario::default()
            .simulate(&df, &scaler, &model)
            .unwrap();
        // Exact linear fit: the shift moves every prediction by 5000 * 0.2.
        assert!(outcome.mean_delta > 0.0);
        assert!((outcome.mean_delta - 1000.0).abs() < 1e-6);
        assert_eq!(outcome.rows, 20);
        assert!(df.equals(&before));
    }

    #[test]
    fn test_unknown_column_is_reported() {
        let df = frame();
        let (scaler, model) = fitted(&df);
        let scenario = PolicyScenario::new("subsidy", 1.0);
        assert!(matches!(
            scenario.simulate(&df, &scaler, &model),
            Err(PanelError::ColumnNotFound(_))
        ));
    }
}
