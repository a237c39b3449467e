#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Linefault data preparation: production-line loading, fault labelling,
//! grouped splitting, class balancing and importance-based feature selection.

/// Error types shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// TOML pipeline configuration.
#[path = "../config.rs"]
pub mod config;

/// Atomic file replacement.
#[path = "../atomic.rs"]
pub mod atomic;

/// Column-oriented tabular records.
#[path = "../frame.rs"]
pub mod frame;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Temporal dataset producers.
#[path = "../producer.rs"]
pub mod producer;

/// Production line dataset loading.
#[path = "../loader.rs"]
pub mod loader;

/// Fault label derivation.
#[path = "../labels.rs"]
pub mod labels;

/// Irrelevant column removal.
#[path = "../filter.rs"]
pub mod filter;

/// Grouped, fault-stratified train/test split.
#[path = "../splitter.rs"]
pub mod splitter;

/// Negative-class under-sampling.
#[path = "../sampler.rs"]
pub mod sampler;

/// Importance ranking, selection and selection persistence.
#[path = "../selection/main.rs"]
pub mod selection;

/// High-level orchestration entry point.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use config::PipelineConfig;
pub use error::{GenerationError, PrepError, PrepResult};
pub use filter::FeatureFilter;
pub use frame::{Cell, Frame, RecordId};
pub use loader::DataLoader;
pub use orchestration_entry::{
    select_and_save_features, PipelineContext, PipelineError, SelectionOutcome, SelectionReport,
    SelectionRequest, Stage,
};
pub use producer::{CommandProducer, DataProducer};
pub use sampler::{BalancedSampler, BalancedSplit};
pub use selection::{
    FeatureImportanceRanking, FeatureSelector, FileSelectionStore, ForestImportance,
    ImportanceEstimator, MemorySelectionStore, SelectionArtifact, SelectionKey, SelectionStore,
};
pub use splitter::DatasetSplitter;
pub use telemetry::{log as log_event, PrepTelemetry, PrepTelemetryBuilder};
