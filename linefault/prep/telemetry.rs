use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use crate::config::LoggingConfig;

/// Builder for preparation telemetry.
pub struct PrepTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    echo_stderr: bool,
    run_id: Option<String>,
}

impl PrepTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            echo_stderr: false,
            run_id: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the minimum level written.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Mirrors warnings and errors to stderr.
    #[must_use]
    pub fn echo_stderr(mut self, enabled: bool) -> Self {
        self.echo_stderr = enabled;
        self
    }

    /// Tags every record with a run id.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Applies a logging config section.
    #[must_use]
    pub fn from_config(mut self, config: &LoggingConfig) -> Self {
        self.log_path = config.path.clone();
        self.min_level = config.level;
        self.echo_stderr = config.echo_stderr;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PrepTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(Arc::new(
                JsonLogger::new(path)?
                    .with_min_level(self.min_level)
                    .with_stderr_echo(self.echo_stderr),
            )),
            None => None,
        };
        Ok(PrepTelemetry {
            module: self.module,
            run_id: self.run_id,
            logger,
        })
    }
}

/// Logging handle shared by the pipeline stages.
#[derive(Clone)]
pub struct PrepTelemetry {
    module: String,
    run_id: Option<String>,
    logger: Option<Arc<JsonLogger>>,
}

impl fmt::Debug for PrepTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepTelemetry")
            .field("module", &self.module)
            .field("run_id", &self.run_id)
            .field("enabled", &self.logger.is_some())
            .finish()
    }
}

impl PrepTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PrepTelemetryBuilder {
        PrepTelemetryBuilder::new(module)
    }

    /// Handle that drops every record.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            run_id: None,
            logger: None,
        }
    }

    /// Same sink, different module name.
    #[must_use]
    pub fn for_module(&self, module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            run_id: self.run_id.clone(),
            logger: self.logger.clone(),
        }
    }

    /// Module name stamped on records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.logger {
            let mut record = LogRecord::new(&self.module, level, message).with_metadata(metadata);
            if let Some(run_id) = &self.run_id {
                record = record.with_run_id(run_id.clone());
            }
            logger.log(&record)?;
        }
        Ok(())
    }
}

/// Logs through an optional handle. Sink failures are reported on stderr
/// and never fail the caller.
pub fn log(telemetry: Option<&PrepTelemetry>, level: LogLevel, message: &str, metadata: Value) {
    if let Some(tel) = telemetry {
        if let Err(err) = tel.log(level, message, metadata) {
            eprintln!("telemetry log failed: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_logging::read_records;
    use tempfile::tempdir;

    #[test]
    fn telemetry_tags_module_and_run() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("prep.log");
        let telemetry = PrepTelemetry::builder("pipeline")
            .log_path(&path)
            .run_id("run-7")
            .build()
            .unwrap();
        telemetry
            .for_module("sampler")
            .log(LogLevel::Info, "balanced", json!({ "negatives": 40 }))
            .unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].module, "sampler");
        assert_eq!(records[0].run_id.as_deref(), Some("run-7"));
    }

    #[test]
    fn optional_handle_logs_or_skips() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cli.log");
        let telemetry = PrepTelemetry::builder("select_cli")
            .log_path(&path)
            .build()
            .unwrap();
        log(Some(&telemetry), LogLevel::Info, "cli_invoked", json!({ "line": 1 }));
        log(None, LogLevel::Error, "dropped", json!({}));
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "cli_invoked");
    }

    #[test]
    fn disabled_handle_is_silent() {
        let telemetry = PrepTelemetry::disabled("loader");
        telemetry
            .log(LogLevel::Error, "ignored", json!({}))
            .unwrap();
        assert_eq!(telemetry.module(), "loader");
    }
}
