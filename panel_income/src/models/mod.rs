//! Regression models behind a common fit/predict interface.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::math::metrics::r_squared;
use crate::PanelError;

pub mod linear;
#[cfg(any(feature = "forest", feature = "boosting"))]
pub mod tree;
#[cfg(feature = "forest")]
pub mod forest;
#[cfg(feature = "boosting")]
pub mod boosting;

pub use crate::models::linear::RidgeRegression;
#[cfg(feature = "forest")]
pub use crate::models::forest::{RandomForest, RandomForestParams};
#[cfg(feature = "boosting")]
pub use crate::models::boosting::{BoostingFlavor, BoostingParams, GradientBoosting};

/// A supervised regression model.
pub trait Regressor: Send + Sync {
    /// Short display name used in reports.
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), PanelError>;

    /// Predicts one value per row of `x`. Fails with `NotFitted` before
    /// [`Regressor::fit`] has succeeded.
    fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, PanelError>;

    /// Coefficient of determination of the predictions on `(x, y)`.
    fn score(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<f64, PanelError> {
        r_squared(y, &self.predict(x)?)
    }
}

/// The model variants the benchmark knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelKind {
    Ridge,
    RandomForest,
    /// Depth-wise second-order boosting with exact split search.
    LevelWiseBoosting,
    /// Leaf-wise boosting over histogram-binned features.
    LeafWiseBoosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Ridge,
        ModelKind::RandomForest,
        ModelKind::LevelWiseBoosting,
        ModelKind::LeafWiseBoosting,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Ridge => "Ridge",
            ModelKind::RandomForest => "RandomForest",
            ModelKind::LevelWiseBoosting => "LevelWiseBoosting",
            ModelKind::LeafWiseBoosting => "LeafWiseBoosting",
        }
    }

    /// Builds an unfitted model with default hyperparameters.
    ///
    /// Variants whose Cargo feature is disabled return
    /// `PanelError::MissingDependency`.
    pub fn build(self, seed: u64) -> Result<Box<dyn Regressor>, PanelError> {
        match self {
            ModelKind::Ridge => Ok(Box::new(RidgeRegression::default())),
            ModelKind::RandomForest => {
                #[cfg(feature = "forest")]
                {
                    Ok(Box::new(RandomForest::new(RandomForestParams {
                        seed,
                        ..RandomForestParams::default()
                    })))
                }
                #[cfg(not(feature = "forest"))]
                {
                    let _ = seed;
                    Err(missing(self, "forest"))
                }
            }
            ModelKind::LevelWiseBoosting | ModelKind::LeafWiseBoosting => {
                #[cfg(feature = "boosting")]
                {
                    let params = if self == ModelKind::LevelWiseBoosting {
                        BoostingParams::level_wise()
                    } else {
                        BoostingParams::leaf_wise()
                    };
                    Ok(Box::new(GradientBoosting::new(BoostingParams { seed, ..params })))
                }
                #[cfg(not(feature = "boosting"))]
                {
                    let _ = seed;
                    Err(missing(self, "boosting"))
                }
            }
        }
    }
}

#[cfg(any(not(feature = "forest"), not(feature = "boosting")))]
fn missing(kind: ModelKind, feature: &str) -> PanelError {
    PanelError::MissingDependency(format!(
        "{} requires the `{}` feature of panel_income",
        kind.label(),
        feature
    ))
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelKind {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "ridge" => Ok(ModelKind::Ridge),
            "randomforest" | "forest" | "rf" => Ok(ModelKind::RandomForest),
            "levelwiseboosting" | "levelwise" => Ok(ModelKind::LevelWiseBoosting),
            "leafwiseboosting" | "leafwise" => Ok(ModelKind::LeafWiseBoosting),
            _ => Err(PanelError::InvalidParameter(format!("unknown model: {}", s))),
        }
    }
}

/// Validates training inputs shared by every model.
pub(crate) fn check_fit_input(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), PanelError> {
    if x.nrows() != y.len() {
        return Err(PanelError::ShapeMismatch {
            expected: format!("{} targets", x.nrows()),
            found: format!("{} targets", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(PanelError::DataQuality(
            "cannot fit a model on zero rows".to_string(),
        ));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(PanelError::DataQuality(
            "training data contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Validates that a model has been fitted on `fitted_width` features.
pub(crate) fn check_predict_input(
    name: &str,
    fitted_width: Option<usize>,
    x: &DMatrix<f64>,
) -> Result<(), PanelError> {
    let width = fitted_width.ok_or_else(|| PanelError::NotFitted(name.to_string()))?;
    if x.ncols() != width {
        return Err(PanelError::ShapeMismatch {
            expected: format!("{} features", width),
            found: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}
