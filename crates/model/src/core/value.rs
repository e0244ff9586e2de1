use crate::core::utils::encode_bytea;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single typed cell read from, or written to, a relational store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    Boolean(bool),
    Json(serde_json::Value),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    TimestampNaive(NaiveDateTime),
    Null,
}

/// The logical type of a [`Value`], used to type column arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Float,
    Decimal,
    String,
    Boolean,
    Json,
    Uuid,
    Bytes,
    Date,
    Timestamp,
    TimestampNaive,
}

impl Value {
    /// Returns `true` for SQL NULL and for the float NaN sentinel.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Decimal(_) => Some(ValueKind::Decimal),
            Value::String(_) => Some(ValueKind::String),
            Value::Boolean(_) => Some(ValueKind::Boolean),
            Value::Json(_) => Some(ValueKind::Json),
            Value::Uuid(_) => Some(ValueKind::Uuid),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Date(_) => Some(ValueKind::Date),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
            Value::TimestampNaive(_) => Some(ValueKind::TimestampNaive),
            Value::Null => None,
        }
    }

    /// Renders the value as a delimited-text field. NULL becomes the empty field.
    pub fn to_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_nan() => String::new(),
            Value::Float(v) => ryu::Buffer::new().format(*v).to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Boolean(v) => v.to_string(),
            Value::Json(v) => v.to_string(),
            Value::Uuid(v) => v.to_string(),
            Value::Bytes(v) => encode_bytea(v),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::TimestampNaive(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::Null => String::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Decimal => "decimal",
            ValueKind::String => "string",
            ValueKind::Boolean => "boolean",
            ValueKind::Json => "json",
            ValueKind::Uuid => "uuid",
            ValueKind::Bytes => "bytes",
            ValueKind::Date => "date",
            ValueKind::Timestamp => "timestamptz",
            ValueKind::TimestampNaive => "timestamp",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}
