//! Model-agnostic feature attribution by sampled Shapley values.
//!
//! For an explained row `x`, each sample draws a background row `z` and a
//! random feature ordering, then switches features from `z` to `x` one at a
//! time in that order. The change in prediction at each switch is credited
//! to the switched feature. Per sample the credits telescope to
//! `f(x) - f(z)`, so averaged over samples the contributions of a row sum to
//! `f(x)` minus the mean prediction of the drawn background rows.

#[cfg(feature = "plot")]
use std::path::Path;

use comfy_table::{Cell, Table};
use getset::Getters;
use nalgebra::{DMatrix, DVector, RowDVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::models::Regressor;
use crate::PanelError;

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone)]
pub struct ShapleyExplainer {
    /// Sampled orderings per explained row.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for ShapleyExplainer {
    fn default() -> Self {
        Self {
            permutations: 32,
            seed: 42,
        }
    }
}

/// Mean contribution of one feature across the explained rows.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct FeatureImportance {
    feature: String,
    mean_abs: f64,
    mean: f64,
}

#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct AttributionReport {
    model: String,
    feature_names: Vec<String>,
    /// One row per explained row, one column per feature.
    #[serde(skip)]
    contributions: DMatrix<f64>,
    /// Mean prediction of the background rows drawn for each explained row.
    base_values: Vec<f64>,
    predictions: Vec<f64>,
    /// Features sorted by descending mean absolute contribution.
    ranking: Vec<FeatureImportance>,
}

impl ShapleyExplainer {
    pub fn new(permutations: usize, seed: u64) -> Self {
        Self { permutations, seed }
    }

    /// Attributes the predictions of `model` on every row of `x`.
    ///
    /// Background rows are drawn uniformly from `background`, which should be
    /// in the same (scaled) feature space as `x`. Rows are explained in
    /// parallel; row `i` samples from its own generator seeded with
    /// `seed + i`.
    pub fn explain(
        &self,
        model: &dyn Regressor,
        x: &DMatrix<f64>,
        background: &DMatrix<f64>,
        feature_names: &[String],
    ) -> Result<AttributionReport, PanelError> {
        let p = x.ncols();
        if feature_names.len() != p || background.ncols() != p {
            return Err(PanelError::ShapeMismatch {
                expected: format!("{} features", feature_names.len()),
                found: format!("{} explained, {} background", p, background.ncols()),
            });
        }
        if self.permutations == 0 {
            return Err(PanelError::InvalidParameter(
                "at least one permutation is required".to_string(),
            ));
        }
        if background.nrows() == 0 {
            return Err(PanelError::DataQuality(
                "background sample is empty".to_string(),
            ));
        }

        let rows = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.explain_row(model, &x.row(i).into_owned(), background, i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut contributions = DMatrix::zeros(x.nrows(), p);
        let mut base_values = Vec::with_capacity(rows.len());
        let mut predictions = Vec::with_capacity(rows.len());
        for (i, (phi, base, prediction)) in rows.into_iter().enumerate() {
            contributions.set_row(i, &phi);
            base_values.push(base);
            predictions.push(prediction);
        }

        let ranking = rank(&contributions, feature_names);
        if let Some(top) = ranking.first() {
            info!(
                model = model.name(),
                rows = x.nrows(),
                top_feature = %top.feature,
                "computed feature attributions"
            );
        }
        Ok(AttributionReport {
            model: model.name().to_string(),
            feature_names: feature_names.to_vec(),
            contributions,
            base_values,
            predictions,
            ranking,
        })
    }

    /// Returns `(contributions, base value, prediction)` for one row.
    fn explain_row(
        &self,
        model: &dyn Regressor,
        row: &RowDVector<f64>,
        background: &DMatrix<f64>,
        index: usize,
    ) -> Result<(RowDVector<f64>, f64, f64), PanelError> {
        let p = row.len();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let mut order: Vec<usize> = (0..p).collect();
        let mut orders = Vec::with_capacity(self.permutations);

        // Every coalition of every sample is predicted in one batch: sample
        // `m` occupies rows `m * (p + 1) ..= m * (p + 1) + p`, starting from
        // the background row and switching one more feature per row.
        let mut batch = DMatrix::zeros(self.permutations * (p + 1), p);
        for m in 0..self.permutations {
            let z = background.row(rng.gen_range(0..background.nrows()));
            order.shuffle(&mut rng);
            let start = m * (p + 1);
            let mut current = z.into_owned();
            batch.set_row(start, &current);
            for (step, &feature) in order.iter().enumerate() {
                current[feature] = row[feature];
                batch.set_row(start + step + 1, &current);
            }
            orders.push(order.clone());
        }
        let preds: DVector<f64> = model.predict(&batch)?;

        let mut phi = RowDVector::zeros(p);
        let mut base = 0.0;
        for (m, order) in orders.iter().enumerate() {
            let start = m * (p + 1);
            base += preds[start];
            for (step, &feature) in order.iter().enumerate() {
                phi[feature] += preds[start + step + 1] - preds[start + step];
            }
        }
        let k = self.permutations as f64;
        phi /= k;
        let prediction = preds[self.permutations * (p + 1) - 1];
        Ok((phi, base / k, prediction))
    }
}

fn rank(contributions: &DMatrix<f64>, names: &[String]) -> Vec<FeatureImportance> {
    let n = contributions.nrows().max(1) as f64;
    let mut ranking: Vec<FeatureImportance> = names
        .iter()
        .zip(contributions.column_iter())
        .map(|(name, col)| FeatureImportance {
            feature: name.clone(),
            mean_abs: col.iter().map(|v| v.abs()).sum::<f64>() / n,
            mean: col.sum() / n,
        })
        .collect();
    ranking.sort_by(|a, b| b.mean_abs.total_cmp(&a.mean_abs));
    ranking
}

fn bar(value: f64, max: f64) -> String {
    let len = if max > 0.0 {
        ((value / max) * BAR_WIDTH as f64).round() as usize
    } else {
        0
    };
    "█".repeat(len.min(BAR_WIDTH))
}

impl AttributionReport {
    /// Contribution sums per explained row; each equals
    /// `prediction - base value`.
    pub fn row_totals(&self) -> Vec<f64> {
        self.contributions.row_iter().map(|r| r.sum()).collect()
    }

    /// Ranked console table with a proportional bar per feature.
    pub fn table(&self) -> Table {
        let max = self.ranking.first().map_or(0.0, |f| f.mean_abs);
        let mut table = Table::new();
        table.set_header(vec!["Rank", "Feature", "Mean |φ|", "Mean φ", ""]);
        for (i, f) in self.ranking.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&f.feature),
                Cell::new(format!("{:.2}", f.mean_abs)),
                Cell::new(format!("{:+.2}", f.mean)),
                Cell::new(bar(f.mean_abs, max)),
            ]);
        }
        table
    }

    /// Writes a horizontal bar chart of the ranking as SVG.
    #[cfg(feature = "plot")]
    pub fn render_chart(&self, path: &Path) -> Result<(), PanelError> {
        use plotters::prelude::*;

        fn chart_err<E: std::fmt::Display>(e: E) -> PanelError {
            PanelError::Chart(e.to_string())
        }

        let n = self.ranking.len();
        if n == 0 {
            return Err(PanelError::DataQuality(
                "no features to chart".to_string(),
            ));
        }
        let max = self.ranking[0].mean_abs.max(f64::MIN_POSITIVE);

        let root = SVGBackend::new(path, (900, 60 + 40 * n as u32)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(
                format!("Mean |contribution| to {} predictions", self.model),
                ("sans-serif", 22).into_font(),
            )
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(120)
            .build_cartesian_2d(0.0..max * 1.1, (0..n).into_segmented())
            .map_err(chart_err)?;

        // Highest-ranked feature at the top.
        let label = |v: &SegmentValue<usize>| match v {
            SegmentValue::CenterOf(i) if *i < n => self.ranking[n - 1 - i].feature.clone(),
            _ => String::new(),
        };
        chart
            .configure_mesh()
            .disable_y_mesh()
            .y_label_formatter(&label)
            .x_desc("mean |φ|")
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(self.ranking.iter().enumerate().map(|(rank, f)| {
                let pos = n - 1 - rank;
                let mut bar = Rectangle::new(
                    [
                        (0.0, SegmentValue::Exact(pos)),
                        (f.mean_abs, SegmentValue::Exact(pos + 1)),
                    ],
                    BLUE.mix(0.7).filled(),
                );
                bar.set_margin(6, 6, 0, 0);
                bar
            }))
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
        info!(path = %path.display(), "wrote attribution chart");
        Ok(())
    }
}
