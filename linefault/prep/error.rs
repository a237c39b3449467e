use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the preparation stages.
pub type PrepResult<T> = Result<T, PrepError>;

/// Failure reported by a [`DataProducer`](crate::producer::DataProducer).
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Producer ran and exited unsuccessfully.
    #[error("generator exited with code {code:?}: {stderr}")]
    Failed {
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },
    /// Producer was still running when the deadline passed.
    #[error("generator did not finish within {secs}s")]
    TimedOut {
        /// Configured deadline.
        secs: u64,
    },
    /// Producer could not be launched or awaited.
    #[error("generator `{program}` could not run: {source}")]
    Launch {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the preparation pipeline.
#[derive(Debug, Error)]
pub enum PrepError {
    /// Caller supplied an out-of-range argument or configuration value.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Source data file is absent.
    #[error("data file not found: {}", path.display())]
    NotFound {
        /// Resolved path that was checked.
        path: PathBuf,
    },
    /// External temporal generation failed.
    #[error("temporal generation failed: {0}")]
    Generation(GenerationError),
    /// Generation reported success but the expected file is missing.
    #[error("generation claimed success but produced no file at {}", path.display())]
    MissingArtifact {
        /// Path the producer was expected to create.
        path: PathBuf,
    },
    /// External generation exceeded its deadline.
    #[error("temporal generation timed out after {secs}s")]
    Timeout {
        /// Configured deadline.
        secs: u64,
    },
    /// Not enough examples of a class to proceed.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// Importance ranking produced nothing to select.
    #[error("feature selection failed: {0}")]
    Selection(String),
    /// A required column is absent or has the wrong shape.
    #[error("schema mismatch: column `{column}` {detail}")]
    SchemaMismatch {
        /// Offending column.
        column: String,
        /// What was wrong with it.
        detail: String,
    },
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV parsing or writing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON (de)serialisation error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrepError {
    /// Shorthand for a schema mismatch on `column`.
    pub fn schema(column: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            column: column.into(),
            detail: detail.into(),
        }
    }

    /// Stable name of the error kind, used in reports and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Generation(_) => "generation",
            Self::MissingArtifact { .. } => "missing_artifact",
            Self::Timeout { .. } => "timeout",
            Self::InsufficientData(_) => "insufficient_data",
            Self::Selection(_) => "selection",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::Io(_) => "io",
            Self::Csv(_) => "csv",
            Self::Json(_) => "json",
        }
    }
}

impl From<GenerationError> for PrepError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::TimedOut { secs } => Self::Timeout { secs },
            other => Self::Generation(other),
        }
    }
}
