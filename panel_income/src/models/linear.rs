use nalgebra::{DMatrix, DVector};

use crate::math::ridge::{ridge, RidgeSolution};
use crate::models::{check_fit_input, check_predict_input, Regressor};
use crate::PanelError;

/// L2-penalized linear regression with an unpenalized intercept.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    alpha: f64,
    solution: Option<RidgeSolution>,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            solution: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Slopes of the fitted model, one per feature.
    pub fn coefficients(&self) -> Option<&DVector<f64>> {
        self.solution.as_ref().map(|s| &s.coefficients)
    }

    pub fn intercept(&self) -> Option<f64> {
        self.solution.as_ref().map(|s| s.intercept)
    }
}

impl Regressor for RidgeRegression {
    fn name(&self) -> &'static str {
        "Ridge"
    }

    fn fit(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), PanelError> {
        check_fit_input(x, y)?;
        self.solution = Some(ridge(y, x, self.alpha)?);
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, PanelError> {
        check_predict_input(
            self.name(),
            self.solution.as_ref().map(|s| s.coefficients.len()),
            x,
        )?;
        let solution = self
            .solution
            .as_ref()
            .ok_or_else(|| PanelError::NotFitted(self.name().to_string()))?;
        Ok((x * &solution.coefficients).add_scalar(solution.intercept))
    }
}
