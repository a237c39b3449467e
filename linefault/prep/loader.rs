use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::{DataConfig, SUPPORTED_LINES},
    error::{PrepError, PrepResult},
    frame::Frame,
    producer::DataProducer,
    telemetry::{log, PrepTelemetry},
};

/// Reads a production line's dataset, generating the temporal variant on demand.
pub struct DataLoader {
    data: DataConfig,
    producer: Box<dyn DataProducer>,
    telemetry: Option<PrepTelemetry>,
}

impl DataLoader {
    /// Creates a loader over the configured data directory.
    #[must_use]
    pub fn new(data: DataConfig, producer: Box<dyn DataProducer>) -> Self {
        Self {
            data,
            producer,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.set_telemetry(telemetry);
        self
    }

    /// Sets telemetry after construction.
    pub fn set_telemetry(&mut self, telemetry: PrepTelemetry) {
        self.telemetry = Some(telemetry.for_module("loader"));
    }

    /// Loads the dataset for `production_line`, with missing cells filled with `0.0`.
    ///
    /// When `temporal` is set and the temporal file is absent, the producer is
    /// run once; a successful run that leaves no file is an error.
    pub fn prepare_data(&self, production_line: i64, temporal: bool) -> PrepResult<Frame> {
        if !SUPPORTED_LINES.contains(&production_line) {
            return Err(PrepError::Validation(format!(
                "production line must be between {} and {}, got {production_line}",
                SUPPORTED_LINES.start(),
                SUPPORTED_LINES.end()
            )));
        }

        let path = self.data.path_for(production_line, temporal);
        if temporal && !path.exists() {
            log(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "temporal_data_missing",
                json!({ "production_line": production_line, "path": path }),
            );
            match self.producer.generate(production_line) {
                Ok(produced) => {
                    if !path.exists() {
                        return Err(PrepError::MissingArtifact { path });
                    }
                    log(
                        self.telemetry.as_ref(),
                        LogLevel::Info,
                        "temporal_data_generated",
                        json!({ "production_line": production_line, "reported": produced }),
                    );
                }
                Err(err) => {
                    log(
                        self.telemetry.as_ref(),
                        LogLevel::Error,
                        "temporal_generation_failed",
                        json!({ "production_line": production_line, "error": err.to_string() }),
                    );
                    return Err(err.into());
                }
            }
        }

        if !path.exists() {
            return Err(PrepError::NotFound { path });
        }
        let frame = Frame::read_csv(&path)?;
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "data_loaded",
            json!({
                "production_line": production_line,
                "temporal": temporal,
                "rows": frame.len(),
                "columns": frame.width(),
            }),
        );
        Ok(frame)
    }
}
