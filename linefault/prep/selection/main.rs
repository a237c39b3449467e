//! Importance-driven feature selection with persisted, replayable selections.

/// Importance estimators.
pub mod importance;
/// Normalised rankings and threshold selection.
pub mod ranking;
/// The selector applied to train/test frames.
pub mod selector;
/// Selection artifact persistence.
pub mod store;

pub use importance::{ForestImportance, ImportanceEstimator};
pub use ranking::{FeatureImportanceRanking, RankedFeature, CUMULATIVE_TOLERANCE};
pub use selector::{FeatureSelection, FeatureSelector};
pub use store::{
    FileSelectionStore, MemorySelectionStore, SelectionArtifact, SelectionKey, SelectionStore,
};
