use crate::{
    core::value::{Value, ValueKind},
    error::IntegrityError,
    records::row::{ResultSet, check_width},
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// Typed storage for one column. Positions flagged in the owning
/// [`ColumnArray`]'s null mask hold a placeholder and must not be read.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Decimal(Vec<BigDecimal>),
    String(Vec<String>),
    Boolean(Vec<bool>),
    Json(Vec<serde_json::Value>),
    Uuid(Vec<Uuid>),
    Bytes(Vec<Vec<u8>>),
    Date(Vec<NaiveDate>),
    Timestamp(Vec<DateTime<Utc>>),
    TimestampNaive(Vec<NaiveDateTime>),
    /// Every cell is null, so no type could be inferred.
    Null(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnArray {
    pub name: String,
    pub values: ColumnValues,
    pub nulls: Vec<bool>,
}

/// Column-major, null-masked view of a [`ResultSet`] used for bulk inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarBatch {
    pub columns: Vec<ColumnArray>,
    len: usize,
}

impl ColumnValues {
    fn with_capacity(kind: ValueKind, cap: usize) -> Self {
        match kind {
            ValueKind::Int => ColumnValues::Int(Vec::with_capacity(cap)),
            ValueKind::Float => ColumnValues::Float(Vec::with_capacity(cap)),
            ValueKind::Decimal => ColumnValues::Decimal(Vec::with_capacity(cap)),
            ValueKind::String => ColumnValues::String(Vec::with_capacity(cap)),
            ValueKind::Boolean => ColumnValues::Boolean(Vec::with_capacity(cap)),
            ValueKind::Json => ColumnValues::Json(Vec::with_capacity(cap)),
            ValueKind::Uuid => ColumnValues::Uuid(Vec::with_capacity(cap)),
            ValueKind::Bytes => ColumnValues::Bytes(Vec::with_capacity(cap)),
            ValueKind::Date => ColumnValues::Date(Vec::with_capacity(cap)),
            ValueKind::Timestamp => ColumnValues::Timestamp(Vec::with_capacity(cap)),
            ValueKind::TimestampNaive => ColumnValues::TimestampNaive(Vec::with_capacity(cap)),
        }
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            ColumnValues::Int(_) => Some(ValueKind::Int),
            ColumnValues::Float(_) => Some(ValueKind::Float),
            ColumnValues::Decimal(_) => Some(ValueKind::Decimal),
            ColumnValues::String(_) => Some(ValueKind::String),
            ColumnValues::Boolean(_) => Some(ValueKind::Boolean),
            ColumnValues::Json(_) => Some(ValueKind::Json),
            ColumnValues::Uuid(_) => Some(ValueKind::Uuid),
            ColumnValues::Bytes(_) => Some(ValueKind::Bytes),
            ColumnValues::Date(_) => Some(ValueKind::Date),
            ColumnValues::Timestamp(_) => Some(ValueKind::Timestamp),
            ColumnValues::TimestampNaive(_) => Some(ValueKind::TimestampNaive),
            ColumnValues::Null(_) => None,
        }
    }

    /// Appends the placeholder used for a null position.
    fn push_placeholder(&mut self) {
        match self {
            ColumnValues::Int(v) => v.push(0),
            ColumnValues::Float(v) => v.push(f64::NAN),
            ColumnValues::Decimal(v) => v.push(BigDecimal::default()),
            ColumnValues::String(v) => v.push(String::new()),
            ColumnValues::Boolean(v) => v.push(false),
            ColumnValues::Json(v) => v.push(serde_json::Value::Null),
            ColumnValues::Uuid(v) => v.push(Uuid::nil()),
            ColumnValues::Bytes(v) => v.push(Vec::new()),
            ColumnValues::Date(v) => v.push(NaiveDate::default()),
            ColumnValues::Timestamp(v) => v.push(DateTime::<Utc>::default()),
            ColumnValues::TimestampNaive(v) => v.push(NaiveDateTime::default()),
            ColumnValues::Null(n) => *n += 1,
        }
    }

    /// Appends a non-null cell, returning the cell's kind on a type mismatch.
    fn push_value(&mut self, value: &Value) -> Result<(), ValueKind> {
        match (self, value) {
            (ColumnValues::Int(v), Value::Int(x)) => v.push(*x),
            (ColumnValues::Float(v), Value::Float(x)) => v.push(*x),
            (ColumnValues::Float(v), Value::Int(x)) => v.push(*x as f64),
            (ColumnValues::Decimal(v), Value::Decimal(x)) => v.push(x.clone()),
            (ColumnValues::String(v), Value::String(x)) => v.push(x.clone()),
            (ColumnValues::Boolean(v), Value::Boolean(x)) => v.push(*x),
            (ColumnValues::Json(v), Value::Json(x)) => v.push(x.clone()),
            (ColumnValues::Uuid(v), Value::Uuid(x)) => v.push(*x),
            (ColumnValues::Bytes(v), Value::Bytes(x)) => v.push(x.clone()),
            (ColumnValues::Date(v), Value::Date(x)) => v.push(*x),
            (ColumnValues::Timestamp(v), Value::Timestamp(x)) => v.push(*x),
            (ColumnValues::TimestampNaive(v), Value::TimestampNaive(x)) => v.push(*x),
            (_, other) => return Err(other.kind().unwrap_or(ValueKind::String)),
        }
        Ok(())
    }
}

impl ColumnArray {
    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.nulls.iter().filter(|n| **n).count()
    }

    /// Reads one cell back, consulting the mask first.
    pub fn cell(&self, idx: usize) -> Option<Value> {
        if *self.nulls.get(idx)? {
            return Some(Value::Null);
        }
        let value = match &self.values {
            ColumnValues::Int(v) => Value::Int(v[idx]),
            ColumnValues::Float(v) => Value::Float(v[idx]),
            ColumnValues::Decimal(v) => Value::Decimal(v[idx].clone()),
            ColumnValues::String(v) => Value::String(v[idx].clone()),
            ColumnValues::Boolean(v) => Value::Boolean(v[idx]),
            ColumnValues::Json(v) => Value::Json(v[idx].clone()),
            ColumnValues::Uuid(v) => Value::Uuid(v[idx]),
            ColumnValues::Bytes(v) => Value::Bytes(v[idx].clone()),
            ColumnValues::Date(v) => Value::Date(v[idx]),
            ColumnValues::Timestamp(v) => Value::Timestamp(v[idx]),
            ColumnValues::TimestampNaive(v) => Value::TimestampNaive(v[idx]),
            ColumnValues::Null(_) => Value::Null,
        };
        Some(value)
    }

    /// Values as `Option`s, `None` wherever the mask marks a null.
    pub fn masked<'a, T>(&'a self, values: &'a [T]) -> impl Iterator<Item = Option<&'a T>> + 'a {
        values
            .iter()
            .zip(self.nulls.iter())
            .map(|(v, null)| if *null { None } else { Some(v) })
    }
}

impl ColumnarBatch {
    /// Pivots a row-oriented result set into one typed, null-masked array per
    /// column.
    ///
    /// A column's type comes from its first non-null cell, except that a
    /// column mixing integers and floats is widened to float. Any other cell
    /// of a different type fails the whole conversion. Float NaN is recorded
    /// as null.
    pub fn from_result_set(set: &ResultSet) -> Result<Self, IntegrityError> {
        let rows = set.rows();
        let width = set.columns().len();
        for (idx, row) in rows.iter().enumerate() {
            check_width(width, idx, row)?;
        }

        let columns = set
            .columns()
            .iter()
            .enumerate()
            .map(|(col, name)| build_column(name, col, rows))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns,
            len: rows.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

fn infer_kind(col: usize, rows: &[Vec<Value>]) -> Option<ValueKind> {
    let mut kind = None;
    for row in rows {
        let cell = &row[col];
        if cell.is_null() {
            continue;
        }
        match (kind, cell.kind()) {
            (None, found) => kind = found,
            (Some(ValueKind::Int), Some(ValueKind::Float)) => return Some(ValueKind::Float),
            (Some(ValueKind::Int), Some(ValueKind::Int)) => {}
            // First non-null cell decides everything else.
            (Some(k), _) => return Some(k),
        }
    }
    kind
}

fn build_column(name: &str, col: usize, rows: &[Vec<Value>]) -> Result<ColumnArray, IntegrityError> {
    let mut values = match infer_kind(col, rows) {
        Some(kind) => ColumnValues::with_capacity(kind, rows.len()),
        None => ColumnValues::Null(0),
    };
    let mut nulls = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let cell = &row[col];
        if cell.is_null() {
            nulls.push(true);
            values.push_placeholder();
            continue;
        }
        values.push_value(cell).map_err(|found| IntegrityError::TypeMismatch {
            column: name.to_string(),
            row: idx,
            expected: values.kind().unwrap_or(found),
            found,
        })?;
        nulls.push(false);
    }

    Ok(ColumnArray {
        name: name.to_string(),
        values,
        nulls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    #[test]
    fn test_mask_marks_nulls_not_zero_or_empty() {
        let rs = set(
            &["n", "s"],
            vec![
                vec![Value::Int(0), Value::String(String::new())],
                vec![Value::Null, Value::Null],
                vec![Value::Int(7), Value::String("x".into())],
            ],
        );
        let batch = ColumnarBatch::from_result_set(&rs).unwrap();
        assert_eq!(batch.len(), 3);

        let n = &batch.columns[0];
        assert_eq!(n.nulls, vec![false, true, false]);
        assert_eq!(n.cell(0), Some(Value::Int(0)));
        assert_eq!(n.cell(1), Some(Value::Null));

        let s = &batch.columns[1];
        assert_eq!(s.cell(0), Some(Value::String(String::new())));
        assert_eq!(s.cell(1), Some(Value::Null));
        assert_eq!(s.null_count(), 1);
    }

    #[test]
    fn test_nan_becomes_null() {
        let rs = set(
            &["f"],
            vec![vec![Value::Float(1.5)], vec![Value::Float(f64::NAN)]],
        );
        let batch = ColumnarBatch::from_result_set(&rs).unwrap();
        let f = &batch.columns[0];
        assert_eq!(f.nulls, vec![false, true]);
        assert_eq!(f.cell(1), Some(Value::Null));

        let ColumnValues::Float(values) = &f.values else {
            panic!("expected float column");
        };
        let masked: Vec<_> = f.masked(values).map(|v| v.copied()).collect();
        assert_eq!(masked, vec![Some(1.5), None]);
    }

    #[test]
    fn test_int_float_widening() {
        let rs = set(
            &["x"],
            vec![vec![Value::Int(1)], vec![Value::Null], vec![Value::Float(2.5)]],
        );
        let batch = ColumnarBatch::from_result_set(&rs).unwrap();
        assert_eq!(batch.columns[0].values.kind(), Some(ValueKind::Float));
        assert_eq!(batch.columns[0].cell(0), Some(Value::Float(1.0)));
        assert_eq!(batch.columns[0].cell(2), Some(Value::Float(2.5)));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let rs = set(
            &["id"],
            vec![
                vec![Value::Int(1)],
                vec![Value::Int(2)],
                vec![Value::String("three".into())],
            ],
        );
        let err = ColumnarBatch::from_result_set(&rs).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::TypeMismatch {
                column: "id".into(),
                row: 2,
                expected: ValueKind::Int,
                found: ValueKind::String,
            }
        );
    }

    #[test]
    fn test_all_null_column() {
        let rs = set(&["x"], vec![vec![Value::Null], vec![Value::Null]]);
        let batch = ColumnarBatch::from_result_set(&rs).unwrap();
        assert_eq!(batch.columns[0].values, ColumnValues::Null(2));
        assert_eq!(batch.columns[0].null_count(), 2);
    }
}
