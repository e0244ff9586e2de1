use crate::{core::value::Value, error::IntegrityError};
use serde::{Deserialize, Serialize};

/// Row-oriented result of a query: column names plus rows of equal width.
///
/// Construction enforces `row.len() == columns.len()` for every row, so a
/// `ResultSet` that exists is always rectangular.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, IntegrityError> {
        let mut set = Self::new(columns);
        set.rows.reserve(rows.len());
        for row in rows {
            set.push(row)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, row: Vec<Value>) -> Result<(), IntegrityError> {
        check_width(self.columns.len(), self.rows.len(), &row)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Validates one row against the expected column count.
pub fn check_width(expected: usize, row: usize, cells: &[Value]) -> Result<(), IntegrityError> {
    if cells.len() != expected {
        return Err(IntegrityError::ColumnCount {
            row,
            expected,
            actual: cells.len(),
        });
    }
    Ok(())
}
