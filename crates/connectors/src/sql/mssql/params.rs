use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use model::core::value::{Value, ValueKind};
use std::borrow::Cow;
use tiberius::{ColumnData, ToSql};

/// One bound parameter. Temporal values go through the driver's chrono
/// conversions; everything else is held as ready-made column data.
#[derive(Debug)]
pub enum MssqlParam {
    Data(ColumnData<'static>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
}

impl MssqlParam {
    /// `kind` types the NULL sent for a masked cell, so the server does not
    /// have to convert an untyped NULL into the column type.
    pub fn from_value(value: &Value, kind: Option<ValueKind>) -> Self {
        let data = match value {
            Value::Null => return Self::null(kind),
            Value::Float(f) if f.is_nan() => return Self::null(kind),
            Value::Int(i) => ColumnData::I64(Some(*i)),
            Value::Float(f) => ColumnData::F64(Some(*f)),
            Value::Boolean(b) => ColumnData::Bit(Some(*b)),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b.clone()))),
            Value::Date(d) => return MssqlParam::Date(*d),
            Value::TimestampNaive(ts) => return MssqlParam::DateTime(*ts),
            Value::Timestamp(ts) => return MssqlParam::DateTimeUtc(*ts),
            // Converted server-side; exact for decimals and GUIDs.
            Value::Decimal(_) | Value::String(_) | Value::Json(_) | Value::Uuid(_) => {
                ColumnData::String(Some(Cow::Owned(value.to_text())))
            }
        };
        MssqlParam::Data(data)
    }

    pub fn null(kind: Option<ValueKind>) -> Self {
        let data = match kind {
            Some(ValueKind::Int) => ColumnData::I64(None),
            Some(ValueKind::Float) => ColumnData::F64(None),
            Some(ValueKind::Boolean) => ColumnData::Bit(None),
            Some(ValueKind::Bytes) => ColumnData::Binary(None),
            Some(ValueKind::Date) => ColumnData::Date(None),
            Some(ValueKind::TimestampNaive) => ColumnData::DateTime2(None),
            Some(ValueKind::Timestamp) => ColumnData::DateTimeOffset(None),
            _ => ColumnData::String(None),
        };
        MssqlParam::Data(data)
    }
}

impl ToSql for MssqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            MssqlParam::Data(data) => data.clone(),
            MssqlParam::Date(d) => d.to_sql(),
            MssqlParam::DateTime(ts) => ts.to_sql(),
            MssqlParam::DateTimeUtc(ts) => ts.to_sql(),
        }
    }
}
