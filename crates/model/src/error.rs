use crate::core::value::ValueKind;
use thiserror::Error;

/// A row that breaks the shape or typing of its result set.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrityError {
    #[error("row {row} has {actual} cells but the result set has {expected} columns")]
    ColumnCount {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column `{column}` row {row}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: ValueKind,
        found: ValueKind,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimestampError {
    #[error("unrecognised execution timestamp `{0}` (expected RFC 3339, YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD)")]
    Unrecognised(String),
}
