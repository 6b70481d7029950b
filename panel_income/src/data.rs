//! Conversions between the panel `DataFrame` and the dense matrices the
//! models consume, plus train/test partitioning.

use nalgebra::{DMatrix, DVector};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::generator::Region;
use crate::PanelError;

/// Disjoint train and test views of a panel.
#[derive(Debug, Clone)]
pub struct Partition {
    pub train: DataFrame,
    pub test: DataFrame,
}

/// Extracts the named `f64` columns as a row-major design matrix.
///
/// Column order follows `names`, so two frames with the same columns in a
/// different physical order produce the same matrix layout.
pub fn feature_matrix(df: &DataFrame, names: &[String]) -> Result<DMatrix<f64>, PanelError> {
    let columns = names
        .iter()
        .map(|name| f64_values(df, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DMatrix::from_fn(df.height(), names.len(), |i, j| {
        columns[j][i]
    }))
}

/// Extracts a single `f64` column as a vector.
pub fn target_vector(df: &DataFrame, name: &str) -> Result<DVector<f64>, PanelError> {
    Ok(DVector::from_vec(f64_values(df, name)?))
}

/// Reads a non-null `f64` column; nulls are a data-quality error.
pub(crate) fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, PanelError> {
    let column = df
        .column(name)
        .map_err(|_| PanelError::ColumnNotFound(name.to_string()))?;
    let values = column.f64().map_err(|_| PanelError::ShapeMismatch {
        expected: format!("{} as f64", name),
        found: column.dtype().to_string(),
    })?;
    values
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| PanelError::DataQuality(format!("null value in column {}", name)))
        })
        .collect()
}

/// Rows of `df` whose `region` column equals `region`.
pub fn filter_region(df: &DataFrame, region: Region) -> Result<DataFrame, PanelError> {
    let mask = df
        .column("region")
        .map_err(|_| PanelError::ColumnNotFound("region".to_string()))?
        .as_materialized_series()
        .equal(region.as_str())?;
    Ok(df.filter(&mask)?)
}

/// Shuffles the row indices with `rng` and holds out
/// `ceil(height * test_fraction)` rows as the test partition.
pub fn train_test_split<R: Rng + ?Sized>(
    df: &DataFrame,
    test_fraction: f64,
    rng: &mut R,
) -> Result<Partition, PanelError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PanelError::InvalidParameter(format!(
            "test fraction must lie in (0, 1), got {}",
            test_fraction
        )));
    }
    let n = df.height();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(PanelError::DataQuality(format!(
            "cannot split {} rows with test fraction {}",
            n, test_fraction
        )));
    }

    let mut indices: Vec<IdxSize> = (0..n as IdxSize).collect();
    indices.shuffle(rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    let take = |idx: &[IdxSize]| -> Result<DataFrame, PanelError> {
        let idx = IdxCa::from_vec("idx".into(), idx.to_vec());
        Ok(df.take(&idx)?)
    };
    let partition = Partition {
        train: take(train_idx)?,
        test: take(test_idx)?,
    };
    debug!(
        train = partition.train.height(),
        test = partition.test.height(),
        "split panel"
    );
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn sample_frame() -> DataFrame {
        df!(
            "id" => (0..10).map(|i| i as f64).collect::<Vec<_>>(),
            "b" => (0..10).map(|i| (i * 10) as f64).collect::<Vec<_>>(),
            "region" => &["East", "West", "East", "Central", "East", "West", "East", "Central", "East", "West"]
        )
        .unwrap()
    }

    fn ids(df: &DataFrame) -> Vec<i64> {
        f64_values(df, "id").unwrap().into_iter().map(|v| v as i64).collect()
    }

    #[test]
    fn test_feature_matrix_follows_requested_order() {
        let df = sample_frame();
        let x = feature_matrix(&df, &["b".to_string(), "id".to_string()]).unwrap();
        assert_eq!(x.shape(), (10, 2));
        assert_eq!(x[(3, 0)], 30.0);
        assert_eq!(x[(3, 1)], 3.0);
    }

    #[test]
    fn test_feature_matrix_reports_missing_column() {
        let df = sample_frame();
        let result = feature_matrix(&df, &["id".to_string(), "missing".to_string()]);
        match result {
            Err(PanelError::ColumnNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_column_is_shape_mismatch() {
        let df = sample_frame();
        assert!(matches!(
            target_vector(&df, "region"),
            Err(PanelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let df = sample_frame();
        let mut rng = StdRng::seed_from_u64(0);
        let part = train_test_split(&df, 0.2, &mut rng).unwrap();
        assert_eq!(part.test.height(), 2);
        assert_eq!(part.train.height(), 8);

        let train: HashSet<i64> = ids(&part.train).into_iter().collect();
        let test: HashSet<i64> = ids(&part.test).into_iter().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 10);
    }

    #[test]
    fn test_split_is_reproducible_for_a_seed() {
        let df = sample_frame();
        let a = train_test_split(&df, 0.3, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = train_test_split(&df, 0.3, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(ids(&a.test), ids(&b.test));
    }

    #[test]
    fn test_split_rejects_degenerate_inputs() {
        let df = sample_frame();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            train_test_split(&df, 1.5, &mut rng),
            Err(PanelError::InvalidParameter(_))
        ));

        let tiny = df.head(Some(1));
        assert!(matches!(
            train_test_split(&tiny, 0.2, &mut rng),
            Err(PanelError::DataQuality(_))
        ));
    }

    #[test]
    fn test_filter_region_keeps_matching_rows() {
        let df = sample_frame();
        let east = filter_region(&df, Region::East).unwrap();
        assert_eq!(east.height(), 5);
        let central = filter_region(&df, Region::Central).unwrap();
        assert_eq!(ids(&central), vec![3, 7]);
    }
}
