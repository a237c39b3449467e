use crate::{
    config::FaultTable,
    error::{PrepError, PrepResult},
    frame::{Cell, Frame},
};

/// Name of the derived boolean label column.
pub const LABEL_COLUMN: &str = "label";

/// Attaches `label = (frame[fault column] == fault_code)` to the frame.
pub fn assign_labels(frame: &Frame, faults: &FaultTable, fault_code: i64) -> PrepResult<Frame> {
    let column = faults.column_for(fault_code).ok_or_else(|| {
        PrepError::Validation(format!("fault code {fault_code} has no description column"))
    })?;
    let cells = frame
        .column(column)
        .ok_or_else(|| PrepError::schema(column, "is required to label the fault"))?;
    let labels: Vec<bool> = cells.iter().map(|cell| cell.matches_code(fault_code)).collect();
    attach_labels(frame.clone(), &labels)
}

/// Sets the label column from booleans.
pub fn attach_labels(frame: Frame, labels: &[bool]) -> PrepResult<Frame> {
    let cells = labels
        .iter()
        .map(|&positive| Cell::Num(if positive { 1.0 } else { 0.0 }))
        .collect();
    frame.with_column(LABEL_COLUMN, cells)
}

/// Reads the label column as booleans.
pub fn labels_of(frame: &Frame) -> PrepResult<Vec<bool>> {
    let cells = frame
        .column(LABEL_COLUMN)
        .ok_or_else(|| PrepError::schema(LABEL_COLUMN, "is not present in the frame"))?;
    Ok(cells.iter().map(is_positive).collect())
}

/// Separates features from labels.
pub fn split_labels(frame: &Frame) -> PrepResult<(Frame, Vec<bool>)> {
    let (features, cells) = frame.split_off(LABEL_COLUMN)?;
    Ok((features, cells.iter().map(is_positive).collect()))
}

/// Number of positive labels.
#[must_use]
pub fn count_positives(labels: &[bool]) -> usize {
    labels.iter().filter(|&&positive| positive).count()
}

fn is_positive(cell: &Cell) -> bool {
    cell.as_f64().is_some_and(|value| value != 0.0)
}
