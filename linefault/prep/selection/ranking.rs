use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};

/// Slack applied when comparing the cumulative importance to the threshold.
pub const CUMULATIVE_TOLERANCE: f64 = 1e-9;

/// Checks `0 < threshold <= 1`.
pub fn validate_threshold(threshold: f64) -> PrepResult<()> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(PrepError::Validation(format!(
            "importance threshold must be in (0, 1], got {threshold}"
        )))
    }
}

/// Feature and its normalised importance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFeature {
    /// Column name.
    pub name: String,
    /// Share of total importance.
    pub score: f64,
}

/// Features ordered from most to least important, scores summing to one.
///
/// Zero-score features are left out; equal scores keep column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureImportanceRanking {
    entries: Vec<RankedFeature>,
}

impl FeatureImportanceRanking {
    /// Builds a ranking from raw per-column scores.
    pub fn from_scores(names: &[String], scores: &[f64]) -> PrepResult<Self> {
        if names.len() != scores.len() {
            return Err(PrepError::Selection(format!(
                "estimator returned {} scores for {} features",
                scores.len(),
                names.len()
            )));
        }
        let usable = |score: f64| score.is_finite() && score > 0.0;
        let total: f64 = scores.iter().copied().filter(|&s| usable(s)).sum();
        let mut entries: Vec<RankedFeature> = names
            .iter()
            .zip(scores)
            .filter(|(_, &score)| usable(score))
            .map(|(name, &score)| RankedFeature {
                name: name.clone(),
                score: score / total,
            })
            .collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(Self { entries })
    }

    /// Ranked entries.
    #[must_use]
    pub fn entries(&self) -> &[RankedFeature] {
        &self.entries
    }

    /// Number of ranked features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no feature carries importance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shortest prefix whose cumulative importance reaches `threshold`,
    /// including the feature that crosses it.
    pub fn select(&self, threshold: f64) -> PrepResult<Vec<String>> {
        validate_threshold(threshold)?;
        if self.entries.is_empty() {
            return Err(PrepError::Selection(
                "no feature carries any importance".into(),
            ));
        }
        let mut selected = Vec::new();
        let mut cumulative = 0.0;
        for entry in &self.entries {
            selected.push(entry.name.clone());
            cumulative += entry.score;
            if cumulative + CUMULATIVE_TOLERANCE >= threshold {
                break;
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| (*name).to_string()).collect()
    }

    fn ranking() -> FeatureImportanceRanking {
        FeatureImportanceRanking::from_scores(
            &names(&["d", "b", "a", "c"]),
            &[0.05, 0.3, 0.5, 0.15],
        )
        .unwrap()
    }

    #[test]
    fn sorts_descending_and_normalises() {
        let ranking = ranking();
        let order: Vec<&str> = ranking.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        let sum: f64 = ranking.entries().iter().map(|e| e.score).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn selects_through_the_crossing_feature() {
        let ranking = ranking();
        assert_eq!(ranking.select(0.9).unwrap(), names(&["a", "b", "c"]));
        assert_eq!(ranking.select(0.5).unwrap(), names(&["a"]));
        assert_eq!(ranking.select(1.0).unwrap().len(), 4);
    }

    #[test]
    fn raw_scores_are_rescaled() {
        let ranking =
            FeatureImportanceRanking::from_scores(&names(&["x", "y"]), &[30.0, 10.0]).unwrap();
        assert!((ranking.entries()[0].score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_column_order_and_zeros_drop() {
        let ranking =
            FeatureImportanceRanking::from_scores(&names(&["p", "q", "r"]), &[1.0, 0.0, 1.0])
                .unwrap();
        let order: Vec<&str> = ranking.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["p", "r"]);
    }

    #[test]
    fn empty_ranking_cannot_select() {
        let ranking =
            FeatureImportanceRanking::from_scores(&names(&["x"]), &[0.0]).unwrap();
        assert!(ranking.is_empty());
        assert!(matches!(ranking.select(0.9), Err(PrepError::Selection(_))));
    }

    #[test]
    fn threshold_bounds() {
        for bad in [0.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(validate_threshold(bad), Err(PrepError::Validation(_))));
        }
        assert!(validate_threshold(1.0).is_ok());
    }
}
