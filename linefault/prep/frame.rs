use std::{cmp::Ordering, fmt, path::Path};

use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    atomic::write_atomic,
    error::{PrepError, PrepResult},
};

/// Position of a record in the file it was loaded from.
pub type RecordId = usize;

/// Tokens read as a missing value.
const MISSING_TOKENS: [&str; 5] = ["", "na", "nan", "null", "none"];

/// Single cell of a tabular record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Numeric observation.
    Num(f64),
    /// Categorical or free-text value.
    Text(String),
}

impl Cell {
    /// Parses a raw CSV field. Missing values become `0.0`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
        {
            return Self::Num(0.0);
        }
        trimmed
            .parse::<f64>()
            .map_or_else(|_| Self::Text(trimmed.to_string()), Self::Num)
    }

    /// Numeric view of the cell, parsing text when possible.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }

    /// Whether the cell records the given fault code.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn matches_code(&self, code: i64) -> bool {
        self.as_f64()
            .is_some_and(|value| (value - code as f64).abs() < f64::EPSILON)
    }

    /// Total order used for chronological sorting: numbers first, then text.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.total_cmp(b),
            (Self::Num(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Num(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }

    /// Key used to group records by value.
    #[must_use]
    pub fn group_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Column-oriented dataset with a uniform, ordered schema.
///
/// Every row carries the [`RecordId`] it was loaded with, so partitions can be
/// checked against the source. Operations return new frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: IndexMap<String, Vec<Cell>>,
    ids: Vec<RecordId>,
}

impl Frame {
    /// Builds a frame from named columns of equal length. Record ids are `0..len`.
    pub fn from_columns<I, S>(columns: I) -> PrepResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<Cell>)>,
        S: Into<String>,
    {
        let mut map = IndexMap::new();
        let mut len = None;
        for (name, cells) in columns {
            let name = name.into();
            match len {
                None => len = Some(cells.len()),
                Some(expected) if expected != cells.len() => {
                    return Err(PrepError::schema(
                        name,
                        format!("has {} rows, expected {expected}", cells.len()),
                    ));
                }
                Some(_) => {}
            }
            if map.insert(name.clone(), cells).is_some() {
                return Err(PrepError::schema(name, "appears more than once"));
            }
        }
        Ok(Self {
            columns: map,
            ids: (0..len.unwrap_or(0)).collect(),
        })
    }

    /// Replaces the record ids.
    pub fn with_ids(mut self, ids: Vec<RecordId>) -> PrepResult<Self> {
        if ids.len() != self.len() {
            return Err(PrepError::schema(
                "<record id>",
                format!("{} ids for {} rows", ids.len(), self.len()),
            ));
        }
        self.ids = ids;
        Ok(self)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the frame holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Whether `name` is part of the schema.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Cells of a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Record ids in row order.
    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    /// Returns a copy with `name` set to `cells`, keeping its position when it already exists.
    pub fn with_column(mut self, name: impl Into<String>, cells: Vec<Cell>) -> PrepResult<Self> {
        let name = name.into();
        if cells.len() != self.len() && !(self.columns.is_empty() && self.ids.is_empty()) {
            return Err(PrepError::schema(
                name,
                format!("has {} rows, expected {}", cells.len(), self.len()),
            ));
        }
        if self.columns.is_empty() && self.ids.is_empty() {
            self.ids = (0..cells.len()).collect();
        }
        self.columns.insert(name, cells);
        Ok(self)
    }

    /// Returns a copy without the named columns plus the names actually removed, in schema order.
    #[must_use]
    pub fn drop_columns(&self, names: &[String]) -> (Self, Vec<String>) {
        let mut kept = IndexMap::with_capacity(self.columns.len());
        let mut removed = Vec::new();
        for (name, cells) in &self.columns {
            if names.iter().any(|candidate| candidate == name) {
                removed.push(name.clone());
            } else {
                kept.insert(name.clone(), cells.clone());
            }
        }
        (
            Self {
                columns: kept,
                ids: self.ids.clone(),
            },
            removed,
        )
    }

    /// Returns a copy holding exactly `names`, in that order.
    pub fn select_columns(&self, names: &[String]) -> PrepResult<Self> {
        let mut selected = IndexMap::with_capacity(names.len());
        for name in names {
            let cells = self
                .columns
                .get(name)
                .ok_or_else(|| PrepError::schema(name.clone(), "is not present in the frame"))?;
            selected.insert(name.clone(), cells.clone());
        }
        Ok(Self {
            columns: selected,
            ids: self.ids.clone(),
        })
    }

    /// Removes one column, returning the remaining frame and the column's cells.
    pub fn split_off(&self, name: &str) -> PrepResult<(Self, Vec<Cell>)> {
        let mut columns = self.columns.clone();
        let cells = columns
            .shift_remove(name)
            .ok_or_else(|| PrepError::schema(name, "is not present in the frame"))?;
        Ok((
            Self {
                columns,
                ids: self.ids.clone(),
            },
            cells,
        ))
    }

    /// Returns the rows at the given positions, in the given order.
    #[must_use]
    pub fn take_rows(&self, positions: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(name, cells)| {
                (
                    name.clone(),
                    positions.iter().map(|&pos| cells[pos].clone()).collect(),
                )
            })
            .collect();
        Self {
            columns,
            ids: positions.iter().map(|&pos| self.ids[pos]).collect(),
        }
    }

    /// Dense row-major matrix of every column. Text cells are rejected.
    pub fn to_matrix(&self) -> PrepResult<Array2<f64>> {
        let mut matrix = Array2::<f64>::zeros((self.len(), self.width()));
        for (col_idx, (name, cells)) in self.columns.iter().enumerate() {
            for (row_idx, cell) in cells.iter().enumerate() {
                matrix[[row_idx, col_idx]] = match cell {
                    Cell::Num(value) => *value,
                    Cell::Text(text) => {
                        return Err(PrepError::schema(
                            name.clone(),
                            format!("holds non-numeric value `{text}` at row {row_idx}"),
                        ))
                    }
                };
            }
        }
        Ok(matrix)
    }

    /// Reads a CSV file with a header row.
    pub fn read_csv(path: impl AsRef<Path>) -> PrepResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (idx, field) in record.iter().enumerate() {
                cells[idx].push(Cell::parse(field));
            }
        }
        Self::from_columns(headers.into_iter().zip(cells))
    }

    /// Writes the frame as CSV, atomically replacing `path`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> PrepResult<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.columns.keys())?;
        for row in 0..self.len() {
            writer.write_record(self.columns.values().map(|cells| cells[row].to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| PrepError::Io(err.into_error()))?;
        write_atomic(path.as_ref(), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Frame {
        Frame::from_columns([
            ("a", vec![Cell::Num(1.0), Cell::Num(2.0), Cell::Num(3.0)]),
            ("b", vec![Cell::from("x"), Cell::from("y"), Cell::from("z")]),
            ("c", vec![Cell::Num(0.5), Cell::Num(0.0), Cell::Num(-1.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn parse_fills_missing_tokens_with_zero() {
        for raw in ["", "  ", "NA", "nan", "NULL", "None"] {
            assert_eq!(Cell::parse(raw), Cell::Num(0.0), "token {raw:?}");
        }
        assert_eq!(Cell::parse(" 2.5 "), Cell::Num(2.5));
        assert_eq!(Cell::parse("E-12"), Cell::Text("E-12".into()));
    }

    #[test]
    fn fault_code_matching_accepts_numeric_text() {
        assert!(Cell::Num(3.0).matches_code(3));
        assert!(Cell::from("3").matches_code(3));
        assert!(!Cell::from("3.5").matches_code(3));
        assert!(!Cell::from("motor").matches_code(3));
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Frame::from_columns([("a", vec![Cell::Num(1.0)]), ("b", vec![])]).unwrap_err();
        assert!(matches!(err, PrepError::SchemaMismatch { .. }));
    }

    #[test]
    fn drop_columns_reports_only_present_names() {
        let (frame, removed) = sample().drop_columns(&["b".into(), "missing".into()]);
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(frame.column_names(), vec!["a", "c"]);
    }

    #[test]
    fn take_rows_carries_ids() {
        let frame = sample().take_rows(&[2, 0]);
        assert_eq!(frame.ids(), &[2, 0]);
        assert_eq!(frame.column("a").unwrap(), &[Cell::Num(3.0), Cell::Num(1.0)]);
    }

    #[test]
    fn matrix_rejects_text_columns() {
        let err = sample().to_matrix().unwrap_err();
        assert!(err.to_string().contains("`b`"));
        let numeric = sample().select_columns(&["c".into(), "a".into()]).unwrap();
        let matrix = numeric.to_matrix().unwrap();
        assert_eq!(matrix.shape(), &[3, 2]);
        assert!((matrix[[2, 1]] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn csv_round_trip_preserves_schema_and_fills_gaps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("line.csv");
        std::fs::write(&path, "a,b,c\n1,x,\n,y,2.5\n").unwrap();
        let frame = Frame::read_csv(&path).unwrap();
        assert_eq!(frame.column("c").unwrap(), &[Cell::Num(0.0), Cell::Num(2.5)]);
        assert_eq!(frame.column("a").unwrap()[1], Cell::Num(0.0));

        let out = dir.path().join("out/copy.csv");
        frame.write_csv(&out).unwrap();
        let reread = Frame::read_csv(&out).unwrap();
        assert_eq!(reread.column_names(), frame.column_names());
        assert_eq!(reread.column("b"), frame.column("b"));
    }
}
