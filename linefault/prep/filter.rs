use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::{FaultTable, FilterConfig},
    frame::Frame,
    labels::LABEL_COLUMN,
    telemetry::{log, PrepTelemetry},
};

/// Strips identifier and label-source columns that carry no predictive signal.
#[derive(Debug, Clone)]
pub struct FeatureFilter {
    columns: Vec<String>,
    telemetry: Option<PrepTelemetry>,
}

impl FeatureFilter {
    /// Builds the filter from configuration. Fault description columns are
    /// included when `drop_fault_columns` is set.
    #[must_use]
    pub fn new(config: &FilterConfig, faults: &FaultTable) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let fault_columns = if config.drop_fault_columns {
            faults.all_columns()
        } else {
            Vec::new()
        };
        for column in config.irrelevant_columns.iter().chain(&fault_columns) {
            if column != LABEL_COLUMN && !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        Self {
            columns,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.telemetry = Some(telemetry.for_module("filter"));
        self
    }

    /// Configured column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the frame without the configured columns, and the names that
    /// were actually present and removed. Absent columns are ignored.
    #[must_use]
    pub fn filter(&self, frame: &Frame) -> (Frame, Vec<String>) {
        let (filtered, removed) = frame.drop_columns(&self.columns);
        log(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "irrelevant_features_removed",
            json!({ "removed": removed, "remaining": filtered.width() }),
        );
        (filtered, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FaultColumn, frame::Cell};

    fn filter() -> FeatureFilter {
        FeatureFilter::new(
            &FilterConfig {
                irrelevant_columns: vec!["unit_id".into(), "timestamp".into(), LABEL_COLUMN.into()],
                drop_fault_columns: true,
            },
            &FaultTable {
                columns: vec![FaultColumn {
                    code: 3,
                    column: "fault_desc".into(),
                }],
                default_column: None,
            },
        )
    }

    fn frame() -> Frame {
        Frame::from_columns([
            ("unit_id", vec![Cell::from("u1")]),
            ("temp", vec![Cell::Num(20.0)]),
            ("fault_desc", vec![Cell::Num(3.0)]),
            (LABEL_COLUMN, vec![Cell::Num(1.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn removes_identifiers_and_fault_sources_but_keeps_label() {
        let (filtered, removed) = filter().filter(&frame());
        assert_eq!(removed, vec!["unit_id", "fault_desc"]);
        assert_eq!(filtered.column_names(), vec!["temp", LABEL_COLUMN]);
    }

    #[test]
    fn filtering_twice_is_a_no_op() {
        let filter = filter();
        let (once, _) = filter.filter(&frame());
        let (twice, removed) = filter.filter(&once);
        assert_eq!(twice, once);
        assert!(removed.is_empty());
    }

    #[test]
    fn fault_columns_stay_when_disabled() {
        let filter = FeatureFilter::new(
            &FilterConfig {
                irrelevant_columns: vec![],
                drop_fault_columns: false,
            },
            &FaultTable {
                columns: vec![FaultColumn {
                    code: 3,
                    column: "fault_desc".into(),
                }],
                default_column: None,
            },
        );
        assert!(filter.columns().is_empty());
    }
}
