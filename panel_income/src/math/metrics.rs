//! Regression error metrics.
use nalgebra::DVector;

use crate::PanelError;

fn check_lengths(y_true: &DVector<f64>, y_pred: &DVector<f64>) -> Result<(), PanelError> {
    if y_true.len() != y_pred.len() {
        return Err(PanelError::ShapeMismatch {
            expected: format!("{} predictions", y_true.len()),
            found: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(PanelError::DataQuality(
            "cannot score an empty partition".to_string(),
        ));
    }
    Ok(())
}

/// Root mean squared error.
pub fn rmse(y_true: &DVector<f64>, y_pred: &DVector<f64>) -> Result<f64, PanelError> {
    check_lengths(y_true, y_pred)?;
    Ok(((y_true - y_pred).norm_squared() / y_true.len() as f64).sqrt())
}

/// Coefficient of determination, `1 − SS_res / SS_tot`.
///
/// A constant target has no variance to explain: a perfect prediction scores
/// 1 and anything else scores 0.
pub fn r_squared(y_true: &DVector<f64>, y_pred: &DVector<f64>) -> Result<f64, PanelError> {
    check_lengths(y_true, y_pred)?;
    let y_mean = y_true.mean();
    let ss_total = y_true.iter().map(|&v| (v - y_mean).powi(2)).sum::<f64>();
    let ss_residual = (y_true - y_pred).norm_squared();

    if ss_total == 0.0 {
        return Ok(if ss_residual == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_residual / ss_total)
}
