use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::models::tree::{MaxFeatures, RegressionTree, SplitSearch, TreeParams};
use crate::models::{check_fit_input, check_predict_input, Regressor};
use crate::PanelError;

#[derive(Debug, Clone)]
pub struct RandomForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Fit each tree on a bootstrap resample instead of the full data.
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Bagged ensemble of fully grown variance-reduction trees.
///
/// Tree `i` draws its bootstrap sample and feature subsets from its own
/// `StdRng` seeded with `seed + i`, so the fitted forest does not depend on
/// how rayon schedules the trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: RandomForestParams,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl RandomForest {
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: None,
        }
    }

    pub fn params(&self) -> &RandomForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for RandomForest {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn fit(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), PanelError> {
        check_fit_input(x, y)?;
        if self.params.n_trees == 0 {
            return Err(PanelError::InvalidParameter(
                "a forest needs at least one tree".to_string(),
            ));
        }

        let n = x.nrows();
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; n];
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
            ..TreeParams::default()
        };

        let trees: Vec<RegressionTree> = (0..self.params.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(i as u64));
                let rows: Vec<usize> = if self.params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(
                    x,
                    &grad,
                    &hess,
                    rows,
                    &tree_params,
                    SplitSearch::Exact,
                    &mut rng,
                )
            })
            .collect();

        debug!(
            trees = trees.len(),
            mean_leaves = trees.iter().map(|t| t.n_leaves()).sum::<usize>() as f64
                / trees.len() as f64,
            "fitted random forest"
        );
        self.trees = trees;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, PanelError> {
        check_predict_input(self.name(), self.n_features, x)?;
        let scale = 1.0 / self.trees.len() as f64;
        Ok(DVector::from_fn(x.nrows(), |row, _| {
            self.trees.iter().map(|t| t.predict_row(x, row)).sum::<f64>() * scale
        }))
    }
}
