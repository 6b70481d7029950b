//! Regression trees grown on per-row gradient and hessian statistics.
//!
//! A leaf predicts `-G / (H + λ)` where `G` and `H` are the sums of the
//! gradients and hessians of the rows it holds. With `g = -y`, `h = 1` and
//! `λ = 0` this is the mean target and the split gain is the usual variance
//! reduction, which is how the random forest uses it. Boosting passes the
//! squared-error gradients of the current ensemble instead.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// How many features are considered at each split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Fraction(f64),
}

impl MaxFeatures {
    fn count(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().round() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Order in which leaves are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Breadth-first: every splittable leaf of a level before the next level.
    DepthWise,
    /// Best-first: always split the leaf with the largest gain.
    LeafWise,
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub max_leaves: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Minimum hessian sum per child.
    pub min_child_weight: f64,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    /// Gain a split must exceed.
    pub min_gain: f64,
    pub max_features: MaxFeatures,
    pub growth: Growth,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            max_leaves: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: 0.0,
            lambda: 0.0,
            min_gain: 0.0,
            max_features: MaxFeatures::All,
            growth: Growth::DepthWise,
        }
    }
}

/// Features quantized into at most `max_bins` ordered bins.
///
/// `edges[f][b]` is the inclusive upper bound of bin `b` of feature `f`; the
/// last edge is `+∞`, so every value falls into some bin.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    edges: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    pub fn new(x: &DMatrix<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let mut edges = Vec::with_capacity(x.ncols());
        let mut bins = Vec::with_capacity(x.ncols());

        for col in x.column_iter() {
            let mut uniq: Vec<f64> = col.iter().copied().collect();
            uniq.sort_by(|a, b| a.total_cmp(b));
            uniq.dedup();

            let cut_after: Vec<usize> = if uniq.len() <= max_bins {
                (0..uniq.len().saturating_sub(1)).collect()
            } else {
                let mut idx: Vec<usize> = (1..max_bins)
                    .map(|k| k * uniq.len() / max_bins - 1)
                    .collect();
                idx.dedup();
                idx
            };
            let mut feature_edges: Vec<f64> = cut_after
                .into_iter()
                .map(|i| 0.5 * (uniq[i] + uniq[i + 1]))
                .collect();
            feature_edges.push(f64::INFINITY);

            let feature_bins = col
                .iter()
                .map(|&v| feature_edges.partition_point(|&e| e < v) as u16)
                .collect();
            edges.push(feature_edges);
            bins.push(feature_bins);
        }

        Self { edges, bins }
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len()
    }
}

/// Where split thresholds may be placed.
#[derive(Debug, Clone, Copy)]
pub enum SplitSearch<'a> {
    /// Between every pair of distinct sorted values.
    Exact,
    /// At bin edges only.
    Histogram(&'a BinnedMatrix),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    left_value: f64,
    right_value: f64,
}

struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: Split,
}

/// A fitted binary regression tree.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Builder<'a> {
    x: &'a DMatrix<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a TreeParams,
    search: SplitSearch<'a>,
}

impl RegressionTree {
    /// Grows a tree over `rows` of `x` (rows may repeat, as in a bootstrap
    /// sample).
    pub fn fit(
        x: &DMatrix<f64>,
        grad: &[f64],
        hess: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
        search: SplitSearch,
        rng: &mut StdRng,
    ) -> Self {
        let builder = Builder {
            x,
            grad,
            hess,
            params,
            search,
        };
        builder.grow(rows, rng)
    }

    pub fn predict_row(&self, x: &DMatrix<f64>, row: usize) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[(row, feature)] <= threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl<'a> Builder<'a> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            -g / denom
        } else {
            0.0
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            g * g / denom
        } else {
            0.0
        }
    }

    fn grow(&self, rows: Vec<usize>, rng: &mut StdRng) -> RegressionTree {
        let (g, h) = self.sums(&rows);
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(g, h),
        }];
        let mut pending: Vec<Pending> = Vec::new();
        self.enqueue(&mut pending, 0, rows, 0, rng);

        let mut leaves = 1;
        loop {
            if self.params.max_leaves.is_some_and(|max| leaves >= max) {
                break;
            }
            let pick = match self.params.growth {
                Growth::DepthWise => (!pending.is_empty()).then_some(0),
                Growth::LeafWise => pending
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.split.gain.total_cmp(&b.1.split.gain))
                    .map(|(i, _)| i),
            };
            let Some(pick) = pick else { break };
            let Pending {
                node,
                rows,
                depth,
                split,
            } = pending.remove(pick);

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&r| self.x[(r, split.feature)] <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf {
                value: split.left_value,
            });
            let right = nodes.len();
            nodes.push(Node::Leaf {
                value: split.right_value,
            });
            nodes[node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            leaves += 1;

            self.enqueue(&mut pending, left, left_rows, depth + 1, rng);
            self.enqueue(&mut pending, right, right_rows, depth + 1, rng);
        }

        RegressionTree { nodes }
    }

    fn enqueue(
        &self,
        pending: &mut Vec<Pending>,
        node: usize,
        rows: Vec<usize>,
        depth: usize,
        rng: &mut StdRng,
    ) {
        if self.params.max_depth.is_some_and(|max| depth >= max)
            || rows.len() < self.params.min_samples_split.max(2)
        {
            return;
        }
        if let Some(split) = self.best_split(&rows, rng) {
            pending.push(Pending {
                node,
                rows,
                depth,
                split,
            });
        }
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<Split> {
        let n_features = self.x.ncols();
        let k = self.params.max_features.count(n_features);
        let features: Vec<usize> = if k < n_features {
            sample(rng, n_features, k).into_vec()
        } else {
            (0..n_features).collect()
        };

        let (g, h) = self.sums(rows);
        let parent = self.score(g, h);
        // Splits of a pure node can still show a gain at rounding level.
        let tolerance = 1e-12 * parent.abs().max(1.0);
        let mut best: Option<Split> = None;

        let mut consider = |feature: usize, threshold: f64, gl: f64, hl: f64, nl: usize| {
            let (gr, hr, nr) = (g - gl, h - hl, rows.len() - nl);
            if nl < self.params.min_samples_leaf
                || nr < self.params.min_samples_leaf
                || hl < self.params.min_child_weight
                || hr < self.params.min_child_weight
            {
                return;
            }
            let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
            if gain <= self.params.min_gain || gain <= tolerance {
                return;
            }
            if best.map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold,
                    gain,
                    left_value: self.leaf_value(gl, hl),
                    right_value: self.leaf_value(gr, hr),
                });
            }
        };

        for feature in features {
            match self.search {
                SplitSearch::Exact => {
                    let mut ordered: Vec<(f64, usize)> =
                        rows.iter().map(|&r| (self.x[(r, feature)], r)).collect();
                    ordered.sort_by(|a, b| a.0.total_cmp(&b.0));
                    let (mut gl, mut hl) = (0.0, 0.0);
                    for i in 0..ordered.len() - 1 {
                        let r = ordered[i].1;
                        gl += self.grad[r];
                        hl += self.hess[r];
                        let (v, next) = (ordered[i].0, ordered[i + 1].0);
                        if v < next {
                            consider(feature, 0.5 * (v + next), gl, hl, i + 1);
                        }
                    }
                }
                SplitSearch::Histogram(binned) => {
                    let n_bins = binned.n_bins(feature);
                    let mut hist = vec![(0.0, 0.0, 0usize); n_bins];
                    for &r in rows {
                        let b = &mut hist[binned.bins[feature][r] as usize];
                        b.0 += self.grad[r];
                        b.1 += self.hess[r];
                        b.2 += 1;
                    }
                    let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0);
                    for (b, &(bg, bh, bn)) in hist.iter().enumerate().take(n_bins - 1) {
                        gl += bg;
                        hl += bh;
                        nl += bn;
                        if bn > 0 && nl < rows.len() {
                            consider(feature, binned.edges[feature][b], gl, hl, nl);
                        }
                    }
                }
            }
        }
        best
    }
}
