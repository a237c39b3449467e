use chrono::Utc;
use serde_json::json;
use shared_logging::LogLevel;

use super::{
    importance::ImportanceEstimator,
    ranking::{validate_threshold, FeatureImportanceRanking},
    store::{SelectionArtifact, SelectionKey, SelectionStore},
};
use crate::{
    error::{PrepError, PrepResult},
    frame::Frame,
    labels::{split_labels, LABEL_COLUMN},
    telemetry::{log, PrepTelemetry},
};

/// Train and test frames reduced to the selected features.
#[derive(Debug, Clone)]
pub struct FeatureSelection {
    /// Selected train features, label column last.
    pub train: Frame,
    /// Selected test features, label column last.
    pub test: Frame,
    /// Selection that was applied.
    pub artifact: SelectionArtifact,
    /// Whether the selection came from the store instead of a fit.
    pub replayed: bool,
}

/// Keeps the smallest set of most important features covering a cumulative
/// importance threshold, and applies it identically to train and test.
pub struct FeatureSelector<'a> {
    estimator: &'a dyn ImportanceEstimator,
    store: &'a dyn SelectionStore,
    telemetry: Option<PrepTelemetry>,
}

impl<'a> FeatureSelector<'a> {
    /// Creates a selector over an estimator and a store.
    #[must_use]
    pub fn new(estimator: &'a dyn ImportanceEstimator, store: &'a dyn SelectionStore) -> Self {
        Self {
            estimator,
            store,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.telemetry = Some(telemetry.for_module("selector"));
        self
    }

    /// Fits (or with `model_exist`, replays) a selection and applies it to both frames.
    ///
    /// Both frames must carry the label column; only the train side is used to fit.
    pub fn select_important_features(
        &self,
        train: &Frame,
        test: &Frame,
        production_line: i64,
        fault_code: i64,
        threshold: f64,
        model_exist: bool,
    ) -> PrepResult<FeatureSelection> {
        validate_threshold(threshold)?;
        let key = SelectionKey::new(production_line, fault_code, threshold);

        let stored = if model_exist {
            self.store.load(&key)?
        } else {
            None
        };
        let replayed = stored.is_some();
        let artifact = match stored {
            Some(artifact) => {
                log(
                    self.telemetry.as_ref(),
                    LogLevel::Info,
                    "selection_replayed",
                    json!({ "key": key.to_string(), "features": artifact.features }),
                );
                artifact
            }
            None => {
                if model_exist {
                    log(
                        self.telemetry.as_ref(),
                        LogLevel::Warn,
                        "stored_selection_missing",
                        json!({ "key": key.to_string() }),
                    );
                }
                let artifact = self.fit(train, key)?;
                self.store.save(&key, &artifact)?;
                artifact
            }
        };

        let train = project(train, &artifact.features)?;
        let test = project(test, &artifact.features)?;
        Ok(FeatureSelection {
            train,
            test,
            artifact,
            replayed,
        })
    }

    fn fit(&self, train: &Frame, key: SelectionKey) -> PrepResult<SelectionArtifact> {
        let (features, labels) = split_labels(train)?;
        if features.width() == 0 {
            return Err(PrepError::Selection(
                "no feature columns left to rank".into(),
            ));
        }
        let names = features.column_names();
        let matrix = features.to_matrix()?;
        let scores = self.estimator.importances(matrix.view(), &labels)?;
        let ranking = FeatureImportanceRanking::from_scores(&names, &scores)?;
        let selected = ranking.select(key.threshold)?;
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "features_selected",
            json!({
                "key": key.to_string(),
                "candidates": names.len(),
                "ranked": ranking.len(),
                "selected": selected,
            }),
        );
        Ok(SelectionArtifact {
            production_line: key.production_line,
            fault_code: key.fault_code,
            threshold: key.threshold,
            features: selected,
            ranking,
            created_at: Utc::now(),
        })
    }
}

/// Selected columns in selection order, with the label column appended when present.
fn project(frame: &Frame, features: &[String]) -> PrepResult<Frame> {
    let mut columns = features.to_vec();
    if frame.has_column(LABEL_COLUMN) {
        columns.push(LABEL_COLUMN.to_string());
    }
    frame.select_columns(&columns)
}
