//! Gradient-boosted regression trees for squared error.
//!
//! Two flavors share the same tree learner and differ in how trees are grown:
//! [`BoostingFlavor::LevelWise`] grows depth-limited trees level by level with
//! an exact split search and an L2 leaf penalty; [`BoostingFlavor::LeafWise`]
//! quantizes features into histograms once and grows each tree best-first up
//! to a leaf budget.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

use crate::models::tree::{BinnedMatrix, Growth, RegressionTree, SplitSearch, TreeParams};
use crate::models::{check_fit_input, check_predict_input, Regressor};
use crate::PanelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoostingFlavor {
    LevelWise,
    LeafWise,
}

#[derive(Debug, Clone)]
pub struct BoostingParams {
    pub flavor: BoostingFlavor,
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    /// Histogram resolution; `None` searches exact thresholds.
    pub max_bins: Option<usize>,
    pub seed: u64,
}

impl BoostingParams {
    /// Depth 6 trees, shrinkage 0.3, unit L2 penalty, exact splits.
    pub fn level_wise() -> Self {
        Self {
            flavor: BoostingFlavor::LevelWise,
            n_rounds: 100,
            learning_rate: 0.3,
            tree: TreeParams {
                max_depth: Some(6),
                min_child_weight: 1.0,
                lambda: 1.0,
                growth: Growth::DepthWise,
                ..TreeParams::default()
            },
            max_bins: None,
            seed: 0,
        }
    }

    /// 31 leaves grown best-first, shrinkage 0.1, 255 histogram bins and at
    /// least 20 rows per leaf.
    pub fn leaf_wise() -> Self {
        Self {
            flavor: BoostingFlavor::LeafWise,
            n_rounds: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                max_leaves: Some(31),
                min_samples_leaf: 20,
                min_samples_split: 40,
                min_child_weight: 1e-3,
                growth: Growth::LeafWise,
                ..TreeParams::default()
            },
            max_bins: Some(255),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    params: BoostingParams,
    base_score: f64,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            base_score: 0.0,
            trees: Vec::new(),
            n_features: None,
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for GradientBoosting {
    fn name(&self) -> &'static str {
        match self.params.flavor {
            BoostingFlavor::LevelWise => "LevelWiseBoosting",
            BoostingFlavor::LeafWise => "LeafWiseBoosting",
        }
    }

    fn fit(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), PanelError> {
        check_fit_input(x, y)?;
        if !(self.params.learning_rate > 0.0) {
            return Err(PanelError::InvalidParameter(format!(
                "learning rate must be positive, got {}",
                self.params.learning_rate
            )));
        }

        let n = x.nrows();
        let binned = self.params.max_bins.map(|bins| BinnedMatrix::new(x, bins));
        let search = match &binned {
            Some(b) => SplitSearch::Histogram(b),
            None => SplitSearch::Exact,
        };
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        self.base_score = y.mean();
        let mut pred = vec![self.base_score; n];
        let hess = vec![1.0; n];
        let mut trees = Vec::with_capacity(self.params.n_rounds);

        for round in 0..self.params.n_rounds {
            let grad: Vec<f64> = pred.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let tree = RegressionTree::fit(
                x,
                &grad,
                &hess,
                (0..n).collect(),
                &self.params.tree,
                search,
                &mut rng,
            );
            for (row, p) in pred.iter_mut().enumerate() {
                *p += self.params.learning_rate * tree.predict_row(x, row);
            }
            if round % 25 == 0 {
                let mse = pred
                    .iter()
                    .zip(y.iter())
                    .map(|(p, t)| (p - t).powi(2))
                    .sum::<f64>()
                    / n as f64;
                debug!(model = self.name(), round, train_rmse = mse.sqrt(), leaves = tree.n_leaves());
            }
            trees.push(tree);
        }

        self.trees = trees;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, PanelError> {
        check_predict_input(self.name(), self.n_features, x)?;
        let lr = self.params.learning_rate;
        Ok(DVector::from_fn(x.nrows(), |row, _| {
            self.base_score + lr * self.trees.iter().map(|t| t.predict_row(x, row)).sum::<f64>()
        }))
    }
}
