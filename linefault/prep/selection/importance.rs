use ndarray::ArrayView2;
use rand::{seq::index::sample, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::SelectorConfig,
    error::{PrepError, PrepResult},
};

/// Scores the contribution of every feature column to predicting the label.
pub trait ImportanceEstimator {
    /// Returns one non-negative raw score per column of `features`.
    fn importances(&self, features: ArrayView2<'_, f64>, labels: &[bool]) -> PrepResult<Vec<f64>>;
}

/// Random forest of CART classification trees; importance is the total
/// weighted Gini decrease attributed to each feature.
#[derive(Debug, Clone)]
pub struct ForestImportance {
    trees: usize,
    max_depth: usize,
    min_samples_leaf: usize,
    max_features: Option<usize>,
    seed: u64,
}

impl ForestImportance {
    /// Creates the estimator from selector settings.
    #[must_use]
    pub fn new(config: &SelectorConfig) -> Self {
        Self {
            trees: config.trees.max(1),
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf.max(1),
            max_features: config.max_features,
            seed: config.seed,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn features_per_split(&self, width: usize) -> usize {
        self.max_features
            .unwrap_or_else(|| (width as f64).sqrt().ceil() as usize)
            .clamp(1, width)
    }
}

impl Default for ForestImportance {
    fn default() -> Self {
        Self::new(&SelectorConfig::default())
    }
}

impl ImportanceEstimator for ForestImportance {
    fn importances(&self, features: ArrayView2<'_, f64>, labels: &[bool]) -> PrepResult<Vec<f64>> {
        let (rows, width) = features.dim();
        if rows != labels.len() {
            return Err(PrepError::schema(
                crate::labels::LABEL_COLUMN,
                format!("has {} values for {rows} feature rows", labels.len()),
            ));
        }
        if rows == 0 || width == 0 {
            return Err(PrepError::InsufficientData(
                "importance estimation needs at least one row and one feature".into(),
            ));
        }

        let mut grower = TreeGrower {
            features,
            labels,
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            mtry: self.features_per_split(width),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            totals: vec![0.0; width],
        };
        for _ in 0..self.trees {
            let bootstrap: Vec<usize> = (0..rows).map(|_| grower.rng.gen_range(0..rows)).collect();
            grower.grow(bootstrap, 0);
        }
        Ok(grower.totals)
    }
}

struct TreeGrower<'a, 'b> {
    features: ArrayView2<'a, f64>,
    labels: &'b [bool],
    max_depth: usize,
    min_samples_leaf: usize,
    mtry: usize,
    rng: ChaCha8Rng,
    totals: Vec<f64>,
}

struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

impl TreeGrower<'_, '_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) {
        let positives = rows.iter().filter(|&&row| self.labels[row]).count();
        let impurity = gini(positives, rows.len());
        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf || impurity <= 0.0 {
            return;
        }
        let Some(split) = self.best_split(&rows, impurity) else {
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        {
            self.totals[split.feature] += rows.len() as f64 * split.decrease;
        }
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&row| self.features[[row, split.feature]] <= split.threshold);
        self.grow(left, depth + 1);
        self.grow(right, depth + 1);
    }

    #[allow(clippy::cast_precision_loss)]
    fn best_split(&mut self, rows: &[usize], impurity: f64) -> Option<Split> {
        let width = self.features.ncols();
        let mut candidates = sample(&mut self.rng, width, self.mtry).into_vec();
        candidates.sort_unstable();

        let total = rows.len();
        let total_pos = rows.iter().filter(|&&row| self.labels[row]).count();
        let mut best: Option<Split> = None;
        for feature in candidates {
            let mut column: Vec<(f64, bool)> = rows
                .iter()
                .map(|&row| (self.features[[row, feature]], self.labels[row]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for idx in 0..total - 1 {
                if column[idx].1 {
                    left_pos += 1;
                }
                let left = idx + 1;
                let right = total - left;
                if left < self.min_samples_leaf || right < self.min_samples_leaf {
                    continue;
                }
                let (value, next) = (column[idx].0, column[idx + 1].0);
                if value >= next {
                    continue;
                }
                let weighted = (left as f64 * gini(left_pos, left)
                    + right as f64 * gini(total_pos - left_pos, right))
                    / total as f64;
                let decrease = impurity - weighted;
                if decrease > best.as_ref().map_or(1e-12, |split| split.decrease) {
                    best = Some(Split {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

#[allow(clippy::cast_precision_loss)]
fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}
