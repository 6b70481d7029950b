//! Train/test preparation and the timed model benchmark.

use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::data::{feature_matrix, target_vector, train_test_split, Partition};
use crate::math::metrics::{r_squared, rmse};
use crate::math::scaler::StandardScaler;
use crate::models::{ModelKind, Regressor};
use crate::PanelError;

/// A split panel with the scaler fitted on its training rows and both
/// partitions already standardized.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub partition: Partition,
    pub scaler: StandardScaler,
    pub x_train: DMatrix<f64>,
    pub y_train: DVector<f64>,
    pub x_test: DMatrix<f64>,
    pub y_test: DVector<f64>,
}

/// Splits `df` with a `StdRng` seeded by `split_seed`, fits a
/// [`StandardScaler`] on the training partition only and transforms both
/// partitions with it.
pub fn prepare(
    df: &DataFrame,
    covariates: &[String],
    target: &str,
    test_fraction: f64,
    split_seed: u64,
) -> Result<PreparedData, PanelError> {
    let mut rng = StdRng::seed_from_u64(split_seed);
    let partition = train_test_split(df, test_fraction, &mut rng)?;

    let raw_train = feature_matrix(&partition.train, covariates)?;
    let scaler = StandardScaler::fit(&raw_train, covariates)?;
    let x_train = scaler.transform(&raw_train)?;
    let x_test = scaler.transform_columns(&partition.test, covariates)?;
    let y_train = target_vector(&partition.train, target)?;
    let y_test = target_vector(&partition.test, target)?;

    debug!(
        covariates = covariates.len(),
        train = x_train.nrows(),
        test = x_test.nrows(),
        "prepared design matrices"
    );
    Ok(PreparedData {
        partition,
        scaler,
        x_train,
        y_train,
        x_test,
        y_test,
    })
}

/// Held-out accuracy and training cost of one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelBenchmark {
    pub model: ModelKind,
    pub rmse: f64,
    pub r2: f64,
    #[serde(rename = "train_seconds", serialize_with = "as_seconds")]
    pub train_time: Duration,
}

fn as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Builds, fits and scores one model. Returns the fitted model along with
/// its benchmark so callers can reuse it.
pub fn fit_and_score(
    kind: ModelKind,
    prepared: &PreparedData,
    seed: u64,
) -> Result<(Box<dyn Regressor>, ModelBenchmark), PanelError> {
    let mut model = kind.build(seed)?;

    let start = Instant::now();
    model.fit(&prepared.x_train, &prepared.y_train)?;
    let train_time = start.elapsed();

    let predictions = model.predict(&prepared.x_test)?;
    let benchmark = ModelBenchmark {
        model: kind,
        rmse: rmse(&prepared.y_test, &predictions)?,
        r2: r_squared(&prepared.y_test, &predictions)?,
        train_time,
    };
    if benchmark.r2 < 0.0 {
        warn!(model = %kind, r2 = benchmark.r2, "model is worse than predicting the mean");
    }
    info!(
        model = %kind,
        rmse = benchmark.rmse,
        r2 = benchmark.r2,
        seconds = train_time.as_secs_f64(),
        "benchmarked model"
    );
    Ok((model, benchmark))
}

/// Fits every model in `kinds` on the training partition and scores it on
/// the test partition, in order.
pub fn benchmark_models(
    prepared: &PreparedData,
    kinds: &[ModelKind],
    seed: u64,
) -> Result<Vec<ModelBenchmark>, PanelError> {
    kinds
        .iter()
        .map(|&kind| fit_and_score(kind, prepared, seed).map(|(_, b)| b))
        .collect()
}
