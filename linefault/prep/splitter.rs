use std::cmp::Ordering;

use indexmap::IndexMap;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::SplitConfig,
    error::{PrepError, PrepResult},
    frame::{Cell, Frame},
    labels::{count_positives, labels_of},
    telemetry::{log, PrepTelemetry},
};

/// Records of one physical unit or fault episode.
#[derive(Debug)]
struct Group {
    rows: Vec<usize>,
    positive: bool,
    first_seen: Option<Cell>,
}

/// Grouped, fault-stratified, deterministic train/test partitioner.
///
/// All records of a group land on the same side. Groups holding a positive
/// record and purely negative groups are split separately, each sending its
/// chronologically last `test_fraction` of records to the test side.
#[derive(Debug, Clone)]
pub struct DatasetSplitter {
    config: SplitConfig,
    telemetry: Option<PrepTelemetry>,
}

impl DatasetSplitter {
    /// Creates a splitter.
    #[must_use]
    pub fn new(config: SplitConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.telemetry = Some(telemetry.for_module("splitter"));
        self
    }

    /// Partitions a labelled frame into `(train, test)`.
    pub fn split(&self, frame: &Frame, fault_code: i64) -> PrepResult<(Frame, Frame)> {
        let fraction = self.config.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PrepError::Validation(format!(
                "test fraction must be in (0, 1), got {fraction}"
            )));
        }
        if frame.is_empty() {
            return Err(PrepError::InsufficientData(
                "cannot split an empty dataset".into(),
            ));
        }
        let labels = labels_of(frame)?;
        let groups = self.ordered_groups(frame, &labels);

        let (positive, negative): (Vec<&Group>, Vec<&Group>) =
            groups.iter().partition(|group| group.positive);
        let mut test_rows = Vec::new();
        let mut train_rows = Vec::new();
        for stratum in [positive, negative] {
            let cut = test_cut(&stratum, fraction);
            for (idx, group) in stratum.iter().enumerate() {
                if idx >= cut {
                    test_rows.extend_from_slice(&group.rows);
                } else {
                    train_rows.extend_from_slice(&group.rows);
                }
            }
        }
        train_rows.sort_unstable();
        test_rows.sort_unstable();

        let train = frame.take_rows(&train_rows);
        let test = frame.take_rows(&test_rows);
        let train_labels = labels_of(&train)?;
        let test_labels = labels_of(&test)?;
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "dataset_split",
            json!({
                "fault_code": fault_code,
                "groups": groups.len(),
                "train_rows": train.len(),
                "train_positives": count_positives(&train_labels),
                "test_rows": test.len(),
                "test_positives": count_positives(&test_labels),
            }),
        );
        Ok((train, test))
    }

    fn ordered_groups(&self, frame: &Frame, labels: &[bool]) -> Vec<Group> {
        let group_cells = self
            .config
            .group_column
            .as_deref()
            .and_then(|name| frame.column(name));
        if group_cells.is_none() {
            log(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "group_column_unavailable",
                json!({ "group_column": self.config.group_column }),
            );
        }
        let order_cells = self
            .config
            .order_column
            .as_deref()
            .and_then(|name| frame.column(name));

        let mut groups: IndexMap<String, Group> = IndexMap::new();
        for (row, &positive) in labels.iter().enumerate() {
            let key = group_cells.map_or_else(|| format!("#{row}"), |cells| cells[row].group_key());
            let group = groups.entry(key).or_insert_with(|| Group {
                rows: Vec::new(),
                positive: false,
                first_seen: None,
            });
            group.rows.push(row);
            group.positive |= positive;
            if let Some(cells) = order_cells {
                let cell = &cells[row];
                let earlier = group
                    .first_seen
                    .as_ref()
                    .map_or(true, |seen| cell.total_cmp(seen) == Ordering::Less);
                if earlier {
                    group.first_seen = Some(cell.clone());
                }
            }
        }

        let mut ordered: Vec<Group> = groups.into_values().collect();
        if order_cells.is_some() {
            // Stable: groups with equal start keep first-appearance order.
            ordered.sort_by(|a, b| match (&a.first_seen, &b.first_seen) {
                (Some(a), Some(b)) => a.total_cmp(b),
                _ => Ordering::Equal,
            });
        }
        ordered
    }
}

/// Index of the first group routed to test. Groups from the end are taken
/// until the test share reaches the target; at least one group stays on each
/// side when the stratum has two or more groups.
fn test_cut(groups: &[&Group], fraction: f64) -> usize {
    if groups.len() < 2 {
        return groups.len();
    }
    let total: usize = groups.iter().map(|group| group.rows.len()).sum();
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let target = (total as f64 * fraction).round() as usize;
    let mut cut = groups.len();
    let mut taken = 0;
    while cut > 1 && taken < target {
        cut -= 1;
        taken += groups[cut].rows.len();
    }
    if cut == groups.len() {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{attach_labels, LABEL_COLUMN};
    use std::collections::{HashMap, HashSet};

    fn config(group: Option<&str>, order: Option<&str>) -> SplitConfig {
        SplitConfig {
            group_column: group.map(Into::into),
            order_column: order.map(Into::into),
            test_fraction: 0.2,
        }
    }

    /// `units` groups of `per_unit` rows; every `positive_every`-th unit ends in a fault.
    fn grouped_frame(units: usize, per_unit: usize, positive_every: usize) -> Frame {
        let mut unit_ids = Vec::new();
        let mut stamps = Vec::new();
        let mut temps = Vec::new();
        let mut labels = Vec::new();
        for unit in 0..units {
            for step in 0..per_unit {
                // Later units carry earlier timestamps, so file order and chronology disagree.
                unit_ids.push(Cell::Text(format!("u{unit:03}")));
                stamps.push(Cell::Num((units - unit) as f64 * 100.0 + step as f64));
                temps.push(Cell::Num(step as f64));
                labels.push((unit + 1) % positive_every == 0 && step == per_unit - 1);
            }
        }
        let frame = Frame::from_columns([
            ("unit_id", unit_ids),
            ("timestamp", stamps),
            ("temp", temps),
        ])
        .unwrap();
        attach_labels(frame, &labels).unwrap()
    }

    fn group_sides(frame: &Frame, train: &Frame, test: &Frame) -> HashMap<String, HashSet<bool>> {
        let units = frame.column("unit_id").unwrap();
        let mut sides: HashMap<String, HashSet<bool>> = HashMap::new();
        for (side, part) in [(true, train), (false, test)] {
            for &id in part.ids() {
                sides.entry(units[id].to_string()).or_default().insert(side);
            }
        }
        sides
    }

    #[test]
    fn partitions_every_record_exactly_once() {
        let frame = grouped_frame(30, 4, 5);
        let splitter = DatasetSplitter::new(config(Some("unit_id"), Some("timestamp")));
        let (train, test) = splitter.split(&frame, 3).unwrap();
        assert_eq!(train.len() + test.len(), frame.len());
        let train_ids: HashSet<_> = train.ids().iter().collect();
        assert!(test.ids().iter().all(|id| !train_ids.contains(id)));
        assert_eq!(train.column_names(), frame.column_names());
    }

    #[test]
    fn keeps_each_unit_on_one_side() {
        let frame = grouped_frame(30, 4, 5);
        let splitter = DatasetSplitter::new(config(Some("unit_id"), Some("timestamp")));
        let (train, test) = splitter.split(&frame, 3).unwrap();
        let sides = group_sides(&frame, &train, &test);
        assert_eq!(sides.len(), 30);
        assert!(sides.values().all(|set| set.len() == 1));
    }

    #[test]
    fn both_sides_receive_positive_units() {
        let frame = grouped_frame(30, 4, 5);
        let splitter = DatasetSplitter::new(config(Some("unit_id"), None));
        let (train, test) = splitter.split(&frame, 3).unwrap();
        assert!(count_positives(&labels_of(&train).unwrap()) > 0);
        assert!(count_positives(&labels_of(&test).unwrap()) > 0);
    }

    #[test]
    fn latest_units_go_to_test_when_ordered() {
        let frame = grouped_frame(10, 2, 100);
        let splitter = DatasetSplitter::new(config(Some("unit_id"), Some("timestamp")));
        let (_, test) = splitter.split(&frame, 3).unwrap();
        let units = frame.column("unit_id").unwrap();
        let test_units: HashSet<String> = test.ids().iter().map(|&id| units[id].to_string()).collect();
        // Timestamps decrease with unit index, so the earliest-numbered units are the newest.
        assert!(test_units.contains("u000"));
        assert!(!test_units.contains("u009"));
    }

    #[test]
    fn split_is_deterministic() {
        let frame = grouped_frame(25, 3, 4);
        let splitter = DatasetSplitter::new(config(Some("unit_id"), Some("timestamp")));
        let first = splitter.split(&frame, 3).unwrap();
        let second = splitter.split(&frame, 3).unwrap();
        assert_eq!(first.0.ids(), second.0.ids());
        assert_eq!(first.1.ids(), second.1.ids());
    }

    #[test]
    fn falls_back_to_row_groups_without_group_column() {
        let labels: Vec<bool> = (0..100).map(|i| i % 10 == 0).collect();
        let frame = Frame::from_columns([(
            "temp",
            (0..100).map(|i| Cell::Num(f64::from(i))).collect::<Vec<_>>(),
        )])
        .unwrap();
        let frame = attach_labels(frame, &labels).unwrap();
        let splitter = DatasetSplitter::new(config(Some("unit_id"), None));
        let (train, test) = splitter.split(&frame, 3).unwrap();
        assert_eq!(test.len(), 20);
        assert_eq!(count_positives(&labels_of(&test).unwrap()), 2);
        assert_eq!(train.len(), 80);
    }

    #[test]
    fn requires_label_column() {
        let frame = Frame::from_columns([("temp", vec![Cell::Num(1.0)])]).unwrap();
        let err = DatasetSplitter::new(config(None, None))
            .split(&frame, 3)
            .unwrap_err();
        match err {
            PrepError::SchemaMismatch { column, .. } => assert_eq!(column, LABEL_COLUMN),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_dataset_is_insufficient() {
        let frame = Frame::default();
        let err = DatasetSplitter::new(config(None, None))
            .split(&frame, 3)
            .unwrap_err();
        assert!(matches!(err, PrepError::InsufficientData(_)));
    }
}
