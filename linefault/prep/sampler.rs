use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::SamplingConfig,
    error::{PrepError, PrepResult},
    frame::Frame,
    labels::count_positives,
    telemetry::{log, PrepTelemetry},
};

/// Train and test features with their labels after balancing.
#[derive(Debug, Clone)]
pub struct BalancedSplit {
    /// Training features.
    pub x_train: Frame,
    /// Test features.
    pub x_test: Frame,
    /// Training labels.
    pub y_train: Vec<bool>,
    /// Test labels.
    pub y_test: Vec<bool>,
}

/// Class counts before and after balancing one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    /// Positive records.
    pub positives: usize,
    /// Negative records.
    pub negatives: usize,
}

impl ClassCounts {
    /// Counts classes in a label vector.
    #[must_use]
    pub fn of(labels: &[bool]) -> Self {
        let positives = count_positives(labels);
        Self {
            positives,
            negatives: labels.len() - positives,
        }
    }

    /// Negative-to-positive ratio; `None` without positives.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> Option<f64> {
        (self.positives > 0).then(|| self.negatives as f64 / self.positives as f64)
    }
}

/// Under-samples the negative class to a target negative:positive ratio.
///
/// Positives are always kept. The test side keeps its natural distribution
/// unless `balance_test` is configured.
#[derive(Debug, Clone)]
pub struct BalancedSampler {
    negative_positive_ratio: f64,
    seed: u64,
    balance_test: bool,
    telemetry: Option<PrepTelemetry>,
}

impl BalancedSampler {
    /// Creates a sampler for the given target ratio.
    pub fn new(negative_positive_ratio: f64, config: &SamplingConfig) -> PrepResult<Self> {
        if !(negative_positive_ratio.is_finite() && negative_positive_ratio > 0.0) {
            return Err(PrepError::Validation(format!(
                "negative/positive ratio must be a positive number, got {negative_positive_ratio}"
            )));
        }
        Ok(Self {
            negative_positive_ratio,
            seed: config.seed,
            balance_test: config.balance_test,
            telemetry: None,
        })
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.telemetry = Some(telemetry.for_module("sampler"));
        self
    }

    /// Target ratio.
    #[must_use]
    pub const fn ratio(&self) -> f64 {
        self.negative_positive_ratio
    }

    /// Rebalances the training side (and the test side when configured).
    pub fn balance_dataset(
        &self,
        x_train: &Frame,
        x_test: &Frame,
        y_train: &[bool],
        y_test: &[bool],
    ) -> PrepResult<BalancedSplit> {
        check_lengths("train", x_train, y_train)?;
        check_lengths("test", x_test, y_test)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let (x_train, y_train) = self.balance_side("train", x_train, y_train, &mut rng)?;
        let (x_test, y_test) = if self.balance_test {
            self.balance_side("test", x_test, y_test, &mut rng)?
        } else {
            (x_test.clone(), y_test.to_vec())
        };
        Ok(BalancedSplit {
            x_train,
            x_test,
            y_train,
            y_test,
        })
    }

    fn balance_side(
        &self,
        side: &str,
        features: &Frame,
        labels: &[bool],
        rng: &mut ChaCha8Rng,
    ) -> PrepResult<(Frame, Vec<bool>)> {
        let before = ClassCounts::of(labels);
        let current = before.ratio().ok_or_else(|| {
            PrepError::InsufficientData(format!(
                "{side} set has no positive examples; negative/positive ratio is undefined"
            ))
        })?;
        if current <= self.negative_positive_ratio {
            log(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "balance_skipped",
                json!({ "side": side, "ratio": current, "target": self.negative_positive_ratio }),
            );
            return Ok((features.clone(), labels.to_vec()));
        }

        let negatives: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter_map(|(pos, &positive)| (!positive).then_some(pos))
            .collect();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let keep = ((self.negative_positive_ratio * before.positives as f64).round() as usize)
            .min(negatives.len());

        let mut kept: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter_map(|(pos, &positive)| positive.then_some(pos))
            .collect();
        kept.extend(sample(rng, negatives.len(), keep).into_iter().map(|idx| negatives[idx]));
        kept.sort_unstable();

        let balanced_labels: Vec<bool> = kept.iter().map(|&pos| labels[pos]).collect();
        let after = ClassCounts::of(&balanced_labels);
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "balanced",
            json!({ "side": side, "before": before, "after": after, "target": self.negative_positive_ratio }),
        );
        Ok((features.take_rows(&kept), balanced_labels))
    }
}

fn check_lengths(side: &str, features: &Frame, labels: &[bool]) -> PrepResult<()> {
    if features.len() == labels.len() {
        Ok(())
    } else {
        Err(PrepError::schema(
            crate::labels::LABEL_COLUMN,
            format!(
                "has {} {side} labels for {} {side} rows",
                labels.len(),
                features.len()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Cell;

    fn side(negatives: usize, positives: usize) -> (Frame, Vec<bool>) {
        let total = negatives + positives;
        // Spread positives through the file.
        let labels: Vec<bool> = (0..total)
            .map(|i| i * positives / total != (i + 1) * positives / total)
            .collect();
        let frame = Frame::from_columns([(
            "temp",
            (0..total).map(|i| Cell::Num(i as f64)).collect::<Vec<_>>(),
        )])
        .unwrap();
        (frame, labels)
    }

    fn sampler(ratio: f64, balance_test: bool) -> BalancedSampler {
        BalancedSampler::new(
            ratio,
            &SamplingConfig {
                seed: 7,
                balance_test,
            },
        )
        .unwrap()
    }

    #[test]
    fn downsamples_negatives_to_target_ratio() {
        let (x_train, y_train) = side(760, 40);
        let (x_test, y_test) = side(190, 10);
        let out = sampler(10.0, false)
            .balance_dataset(&x_train, &x_test, &y_train, &y_test)
            .unwrap();
        let counts = ClassCounts::of(&out.y_train);
        assert_eq!(counts.positives, 40);
        assert_eq!(counts.negatives, 400);
        assert_eq!(out.x_train.len(), 440);
        assert_eq!(out.x_test, x_test);
        assert_eq!(out.y_test, y_test);
    }

    #[test]
    fn keeps_rows_aligned_with_labels() {
        let (x_train, y_train) = side(300, 10);
        let out = sampler(2.0, false)
            .balance_dataset(&x_train, &x_train, &y_train, &y_train)
            .unwrap();
        for (id, &label) in out.x_train.ids().iter().zip(&out.y_train) {
            assert_eq!(y_train[*id], label);
        }
        assert!(out.x_train.ids().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ratio_at_or_above_current_leaves_train_unchanged() {
        let (x_train, y_train) = side(50, 10);
        for ratio in [5.0, 6.0, 100.0] {
            let out = sampler(ratio, false)
                .balance_dataset(&x_train, &x_train, &y_train, &y_train)
                .unwrap();
            assert_eq!(out.x_train, x_train);
            assert_eq!(out.y_train, y_train);
        }
    }

    #[test]
    fn same_seed_draws_same_rows() {
        let (x_train, y_train) = side(500, 20);
        let first = sampler(3.0, false)
            .balance_dataset(&x_train, &x_train, &y_train, &y_train)
            .unwrap();
        let second = sampler(3.0, false)
            .balance_dataset(&x_train, &x_train, &y_train, &y_train)
            .unwrap();
        assert_eq!(first.x_train.ids(), second.x_train.ids());
    }

    #[test]
    fn test_side_balanced_only_when_configured() {
        let (x_train, y_train) = side(100, 10);
        let (x_test, y_test) = side(90, 3);
        let out = sampler(5.0, true)
            .balance_dataset(&x_train, &x_test, &y_train, &y_test)
            .unwrap();
        assert_eq!(ClassCounts::of(&out.y_test).negatives, 15);
        assert_eq!(ClassCounts::of(&out.y_test).positives, 3);
    }

    #[test]
    fn no_positives_is_insufficient_data() {
        let (x_train, y_train) = side(100, 0);
        let err = sampler(10.0, false)
            .balance_dataset(&x_train, &x_train, &y_train, &y_train)
            .unwrap_err();
        assert!(matches!(err, PrepError::InsufficientData(_)));
    }

    #[test]
    fn rejects_non_positive_ratio() {
        for ratio in [0.0, -1.0, f64::NAN] {
            let err = BalancedSampler::new(ratio, &SamplingConfig::default()).unwrap_err();
            assert!(matches!(err, PrepError::Validation(_)));
        }
    }
}
