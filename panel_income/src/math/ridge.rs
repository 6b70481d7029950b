use crate::PanelError;
use nalgebra::{DMatrix, DVector};

/// Smallest squared Cholesky pivot accepted, relative to the largest
/// diagonal entry of the normal matrix.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Coefficients of a fitted ridge regression.
#[derive(Debug, Clone)]
pub struct RidgeSolution {
    pub coefficients: DVector<f64>,
    pub intercept: f64,
}

/// Solves an L2-penalized least squares problem with an unpenalized intercept.
///
/// The columns of `x` and `y` are centred first, so the penalty only shrinks
/// the slopes. The coefficients solve
/// `(XcᵀXc + αI) β = Xcᵀyc`
/// and the intercept is recovered as `ȳ − x̄ᵀβ`.
///
/// # Arguments
///
/// * `y` - The outcome vector.
/// * `x` - The design matrix, without an intercept column.
/// * `alpha` - The penalty strength. `0.0` reduces to ordinary least squares.
///
/// # Returns
///
/// The fitted `RidgeSolution`, or a `PanelError::Nalgebra` when the penalized
/// normal matrix is not positive definite.
pub fn ridge(y: &DVector<f64>, x: &DMatrix<f64>, alpha: f64) -> Result<RidgeSolution, PanelError> {
    if x.nrows() != y.len() {
        return Err(PanelError::ShapeMismatch {
            expected: format!("{} targets", x.nrows()),
            found: format!("{} targets", y.len()),
        });
    }
    if !(alpha >= 0.0) {
        return Err(PanelError::InvalidParameter(format!(
            "ridge penalty must be non-negative, got {}",
            alpha
        )));
    }

    let x_mean = x.row_mean().transpose();
    let y_mean = y.mean();

    let mut xc = x.clone();
    for (j, mut col) in xc.column_iter_mut().enumerate() {
        col.add_scalar_mut(-x_mean[j]);
    }
    let yc = y.add_scalar(-y_mean);

    let mut xtx = xc.transpose() * &xc;
    for i in 0..xtx.nrows() {
        xtx[(i, i)] += alpha;
    }
    let xty = xc.transpose() * yc;
    let max_diag = xtx.diagonal().iter().fold(0.0_f64, |acc, &v| acc.max(v));

    // X'X + αI is positive definite for α > 0; with α = 0 a failure means
    // perfect multicollinearity. Rounding can let an exactly singular matrix
    // factor, so a pivot that is negligible against the largest diagonal
    // entry counts as a failure too.
    let singular = || {
        PanelError::Nalgebra(
            "Failed to perform Cholesky decomposition. Matrix may be singular or not positive definite due to multicollinearity.".to_string(),
        )
    };
    let cholesky = xtx.cholesky().ok_or_else(singular)?;
    let min_pivot = cholesky
        .l_dirty()
        .diagonal()
        .iter()
        .fold(f64::INFINITY, |acc, &v| acc.min(v * v));
    if min_pivot <= PIVOT_TOLERANCE * max_diag {
        return Err(singular());
    }
    let coefficients = cholesky.solve(&xty);
    let intercept = y_mean - x_mean.dot(&coefficients);

    Ok(RidgeSolution {
        coefficients,
        intercept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_penalty_recovers_exact_line() {
        // y = 1 + 2x
        let x = DMatrix::from_vec(5, 1, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let y = DVector::from_vec(vec![1.0, 3.0, 5.0, 7.0, 9.0]);

        let fit = ridge(&y, &x, 0.0).expect("ridge failed on valid data");
        assert!((fit.intercept - 1.0).abs() < 1e-9, "Intercept is incorrect");
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-9, "Slope is incorrect");
    }

    #[test]
    fn test_penalty_shrinks_slope_but_not_intercept_mean() {
        let x = DMatrix::from_vec(5, 1, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let y = DVector::from_vec(vec![1.0, 3.0, 5.0, 7.0, 9.0]);

        let fit = ridge(&y, &x, 10.0).unwrap();
        // Centred x'x = 10, x'y = 20 -> slope = 20 / (10 + 10) = 1.
        assert!((fit.coefficients[0] - 1.0).abs() < 1e-9);
        // The fitted line still passes through (x̄, ȳ) = (2, 5).
        assert!((fit.intercept + 2.0 * fit.coefficients[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_columns_fail_without_penalty() {
        let x = DMatrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 2.0, 4.0, 6.0]);
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        match ridge(&y, &x, 0.0) {
            Err(PanelError::Nalgebra(msg)) => {
                assert!(msg.contains("Failed to perform Cholesky decomposition"))
            }
            other => panic!("Expected a Nalgebra error, got {:?}", other),
        }
        assert!(ridge(&y, &x, 1.0).is_ok());
    }

    #[test]
    fn test_near_collinear_columns_still_fit() {
        let x = DMatrix::from_vec(4, 2, vec![1.0, 2.0, 3.0, 4.0, 2.0, 4.1, 5.9, 8.0]);
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(ridge(&y, &x, 0.0).is_ok());
    }

    #[test]
    fn test_constant_column_fails_without_penalty() {
        let x = DMatrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 5.0, 5.0, 5.0]);
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(ridge(&y, &x, 0.0), Err(PanelError::Nalgebra(_))));
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let x = DMatrix::zeros(3, 1);
        let y = DVector::zeros(2);
        assert!(matches!(
            ridge(&y, &x, 1.0),
            Err(PanelError::ShapeMismatch { .. })
        ));
    }
}
