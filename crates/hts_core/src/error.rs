use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plate::Coordinate;

#[derive(Error, Debug)]
pub enum HtsError {
    #[error("Shape mismatch for tag '{tag}': expected {expected_height}x{expected_width}, found {found_height}x{found_width}")]
    ShapeMismatch {
        tag: String,
        expected_height: usize,
        expected_width: usize,
        found_height: usize,
        found_width: usize,
    },

    #[error("Replicate index gap at well {well}: expected replicate {expected}, found {found}")]
    ReplicateGap { well: String, expected: usize, found: usize },

    #[error("Plate '{plate}' is {found_height}x{found_width}, run expects {expected_height}x{expected_width}")]
    GeometryMismatch {
        plate: String,
        expected_height: usize,
        expected_width: usize,
        found_height: usize,
        found_width: usize,
    },

    #[error("Plate '{plate}' layout does not match the run layout: {reason}")]
    LayoutMismatch { plate: String, reason: String },

    #[error("Unknown data tag '{tag}' (known: {known})")]
    UnknownTag { tag: String, known: String },

    #[error("Data tag '{tag}' already exists")]
    TagConflict { tag: String },

    #[error("Invalid well label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("Coordinate ({row}, {column}) out of range for {height}x{width} plate")]
    OutOfRange { row: i64, column: i64, height: usize, width: usize },

    #[error("Degenerate range in {context}: min == max == {value}")]
    DegenerateRange { context: String, value: f64 },

    #[error("Insufficient controls: {control} has {found} usable values, {required} required")]
    InsufficientControls { control: String, found: usize, required: usize },

    #[error("Insufficient sample size for {context}: {found} observations, at least {required} required")]
    InsufficientSampleSize { context: String, found: usize, required: usize },

    #[error("Model fit failed: {0}")]
    ModelFit(String),

    #[error("Unknown task type '{method}'")]
    UnknownTaskType { method: String },

    #[error("Invalid configuration for task '{method}': {reason}")]
    InvalidTaskConfig { method: String, reason: String },

    #[error("Invalid run state transition: {from:?} -> {to:?}")]
    InvalidState { from: crate::run::RunState, to: crate::run::RunState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Stable, serializable error names carried in task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ShapeMismatchError,
    GeometryMismatchError,
    LayoutMismatchError,
    UnknownTagError,
    TagConflictError,
    InvalidLabelError,
    OutOfRangeError,
    DegenerateRangeError,
    InsufficientControlsError,
    InsufficientSampleSizeError,
    ModelFitError,
    UnknownTaskTypeError,
    InvalidTaskConfigError,
    InvalidStateError,
    AdapterError,
}

impl HtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HtsError::ShapeMismatch { .. } | HtsError::ReplicateGap { .. } => {
                ErrorKind::ShapeMismatchError
            }
            HtsError::GeometryMismatch { .. } => ErrorKind::GeometryMismatchError,
            HtsError::LayoutMismatch { .. } => ErrorKind::LayoutMismatchError,
            HtsError::UnknownTag { .. } => ErrorKind::UnknownTagError,
            HtsError::TagConflict { .. } => ErrorKind::TagConflictError,
            HtsError::InvalidLabel { .. } => ErrorKind::InvalidLabelError,
            HtsError::OutOfRange { .. } => ErrorKind::OutOfRangeError,
            HtsError::DegenerateRange { .. } => ErrorKind::DegenerateRangeError,
            HtsError::InsufficientControls { .. } => ErrorKind::InsufficientControlsError,
            HtsError::InsufficientSampleSize { .. } => ErrorKind::InsufficientSampleSizeError,
            HtsError::ModelFit(_) => ErrorKind::ModelFitError,
            HtsError::UnknownTaskType { .. } => ErrorKind::UnknownTaskTypeError,
            HtsError::InvalidTaskConfig { .. } => ErrorKind::InvalidTaskConfigError,
            HtsError::InvalidState { .. } => ErrorKind::InvalidStateError,
            HtsError::Io(_) | HtsError::Json(_) | HtsError::Yaml(_) | HtsError::Csv(_) => {
                ErrorKind::AdapterError
            }
        }
    }

    /// Structural errors describe a broken data model rather than a
    /// statistical edge case.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HtsError::ShapeMismatch { .. }
                | HtsError::ReplicateGap { .. }
                | HtsError::GeometryMismatch { .. }
                | HtsError::LayoutMismatch { .. }
                | HtsError::UnknownTag { .. }
                | HtsError::TagConflict { .. }
                | HtsError::InvalidLabel { .. }
                | HtsError::OutOfRange { .. }
                | HtsError::InvalidState { .. }
        )
    }

    pub(crate) fn unknown_tag<'a>(tag: &str, known: impl IntoIterator<Item = &'a String>) -> Self {
        let known: Vec<&str> = known.into_iter().map(String::as_str).collect();
        HtsError::UnknownTag { tag: tag.to_string(), known: known.join(", ") }
    }

    pub(crate) fn out_of_range(coordinate: Coordinate, height: usize, width: usize) -> Self {
        HtsError::OutOfRange {
            row: coordinate.row as i64,
            column: coordinate.column as i64,
            height,
            width,
        }
    }
}

pub type Result<T> = std::result::Result<T, HtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_taxonomy() {
        let err = HtsError::InsufficientControls {
            control: "pos".to_string(),
            found: 0,
            required: 1,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientControlsError);
        assert!(!err.is_structural());

        let err = HtsError::unknown_tag("raw", &["a".to_string(), "b".to_string()]);
        assert!(err.is_structural());
        assert_eq!(err.to_string(), "Unknown data tag 'raw' (known: a, b)");
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::ModelFitError).unwrap();
        assert_eq!(json, "\"ModelFitError\"");
    }
}
