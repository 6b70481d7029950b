use getset::Getters;
use nalgebra::{DMatrix, DVector};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::debug;

use crate::data::feature_matrix;
use crate::PanelError;

/// Column-wise standardization to zero mean and unit variance.
///
/// The only way to obtain a scaler is [`StandardScaler::fit`], so every
/// scaler carries parameters estimated from exactly the rows it was given.
/// Columns with zero variance are centred but not rescaled.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct StandardScaler {
    feature_names: Vec<String>,
    #[serde(skip)]
    means: DVector<f64>,
    #[serde(skip)]
    scales: DVector<f64>,
}

impl StandardScaler {
    /// Estimates per-column means and population standard deviations.
    pub fn fit(x: &DMatrix<f64>, feature_names: &[String]) -> Result<Self, PanelError> {
        if x.ncols() != feature_names.len() {
            return Err(PanelError::ShapeMismatch {
                expected: format!("{} named columns", feature_names.len()),
                found: format!("{} columns", x.ncols()),
            });
        }
        if x.nrows() == 0 {
            return Err(PanelError::DataQuality(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }

        let n = x.nrows() as f64;
        let means = x.row_mean().transpose();
        let scales = DVector::from_iterator(
            x.ncols(),
            x.column_iter().zip(means.iter()).map(|(col, &mean)| {
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > f64::EPSILON {
                    sd
                } else {
                    1.0
                }
            }),
        );
        debug!(columns = x.ncols(), rows = x.nrows(), "fitted standard scaler");

        Ok(Self {
            feature_names: feature_names.to_vec(),
            means,
            scales,
        })
    }

    /// Fits on the named columns of `df`.
    pub fn fit_frame(df: &DataFrame, feature_names: &[String]) -> Result<Self, PanelError> {
        Self::fit(&feature_matrix(df, feature_names)?, feature_names)
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, PanelError> {
        if x.ncols() != self.means.len() {
            return Err(PanelError::ShapeMismatch {
                expected: format!("{} columns", self.means.len()),
                found: format!("{} columns", x.ncols()),
            });
        }
        let mut out = x.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            col.apply(|v| *v = (*v - mean) / scale);
        }
        Ok(out)
    }

    /// Transforms the columns of `df` this scaler was fitted on, in fit order.
    pub fn transform_frame(&self, df: &DataFrame) -> Result<DMatrix<f64>, PanelError> {
        self.transform(&feature_matrix(df, &self.feature_names)?)
    }

    /// Transforms the `names` columns of `df`, which must match the fitted
    /// columns in the same order.
    pub fn transform_columns(
        &self,
        df: &DataFrame,
        names: &[String],
    ) -> Result<DMatrix<f64>, PanelError> {
        self.check_features(names)?;
        self.transform(&feature_matrix(df, names)?)
    }

    /// Verifies that `names` matches the fitted columns one-for-one.
    pub fn check_features(&self, names: &[String]) -> Result<(), PanelError> {
        if names != self.feature_names.as_slice() {
            return Err(PanelError::ShapeMismatch {
                expected: self.feature_names.join(","),
                found: names.join(","),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("x{}", i)).collect()
    }

    fn sample() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 10.0, 5.0, //
                2.0, 20.0, 5.0, //
                3.0, 30.0, 5.0, //
                4.0, 60.0, 5.0,
            ],
        )
    }

    #[test]
    fn test_scaled_columns_have_zero_mean_unit_variance() {
        let x = sample();
        let scaler = StandardScaler::fit(&x, &names(3)).unwrap();
        let z = scaler.transform(&x).unwrap();

        for j in 0..2 {
            let col = z.column(j);
            let mean = col.mean();
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / col.len() as f64;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
        // Constant column is centred only.
        assert!(z.column(2).iter().all(|v| v.abs() < 1e-12));
        assert_eq!(scaler.scales()[2], 1.0);
    }

    #[test]
    fn test_mean_row_maps_to_zero() {
        let x = sample();
        let scaler = StandardScaler::fit(&x, &names(3)).unwrap();
        let mean_row = DMatrix::from_row_slice(1, 3, scaler.means().as_slice());
        let z = scaler.transform(&mean_row).unwrap();
        assert!(z.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_transform_rejects_wrong_width() {
        let scaler = StandardScaler::fit(&sample(), &names(3)).unwrap();
        let narrow = DMatrix::zeros(2, 2);
        assert!(matches!(
            scaler.transform(&narrow),
            Err(PanelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_features_detects_reordering() {
        let scaler = StandardScaler::fit(&sample(), &names(3)).unwrap();
        assert!(scaler.check_features(&names(3)).is_ok());
        let reordered = vec!["x1".to_string(), "x0".to_string(), "x2".to_string()];
        assert!(scaler.check_features(&reordered).is_err());
    }

    #[test]
    fn test_transform_columns_checks_names() {
        let df = polars::df!(
            "a" => &[1.0, 2.0, 3.0],
            "b" => &[10.0, 30.0, 20.0]
        )
        .unwrap();
        let cols = vec!["a".to_string(), "b".to_string()];
        let scaler = StandardScaler::fit_frame(&df, &cols).unwrap();

        let z = scaler.transform_columns(&df, &cols).unwrap();
        assert_eq!(z, scaler.transform_frame(&df).unwrap());

        let swapped = vec!["b".to_string(), "a".to_string()];
        assert!(matches!(
            scaler.transform_columns(&df, &swapped),
            Err(PanelError::ShapeMismatch { .. })
        ));
        let short = vec!["a".to_string()];
        assert!(matches!(
            scaler.transform_columns(&df, &short),
            Err(PanelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_transform_frame_reports_missing_column() {
        let cols = vec!["a".to_string(), "b".to_string()];
        let train = polars::df!("a" => &[1.0, 2.0], "b" => &[3.0, 4.0]).unwrap();
        let scaler = StandardScaler::fit_frame(&train, &cols).unwrap();
        let without_b = polars::df!("a" => &[1.0, 2.0]).unwrap();
        match scaler.transform_frame(&without_b) {
            Err(PanelError::ColumnNotFound(name)) => assert_eq!(name, "b"),
            other => panic!("expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_parameters_depend_only_on_fitted_rows() {
        let x = sample();
        let train = x.rows(0, 3).into_owned();
        let train_only = StandardScaler::fit(&train, &names(3)).unwrap();
        let with_extra = StandardScaler::fit(&x, &names(3)).unwrap();
        assert_ne!(train_only.means(), with_extra.means());
        assert_eq!(train_only, StandardScaler::fit(&train, &names(3)).unwrap());
    }
}
