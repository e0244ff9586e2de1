use chrono::{Datelike, NaiveDateTime, Timelike};
use model::core::value::Value;
use mysql_async::Value as MySqlValue;
use mysql_common::params::Params;

pub struct MySqlParam(MySqlValue);

impl MySqlParam {
    pub fn from_value(value: &Value) -> Self {
        let value = match value {
            Value::Int(i) => MySqlValue::Int(*i),
            Value::Float(f) if f.is_nan() => MySqlValue::NULL,
            Value::Float(f) => MySqlValue::Double(*f),
            Value::Decimal(d) => MySqlValue::Bytes(d.to_string().into_bytes()),
            Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
            Value::Boolean(b) => MySqlValue::Int(i64::from(*b)),
            Value::Json(j) => MySqlValue::Bytes(j.to_string().into_bytes()),
            Value::Uuid(u) => MySqlValue::Bytes(u.to_string().into_bytes()),
            Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
            Value::Date(d) => MySqlValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
            Value::Timestamp(ts) => datetime(&ts.naive_utc()),
            Value::TimestampNaive(ts) => datetime(ts),
            Value::Null => MySqlValue::NULL,
        };
        MySqlParam(value)
    }
}

fn datetime(ts: &NaiveDateTime) -> MySqlValue {
    MySqlValue::Date(
        ts.year() as u16,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.and_utc().timestamp_subsec_micros(),
    )
}

#[derive(Default)]
pub struct MySqlParamStore {
    pub params: Vec<MySqlParam>,
}

impl MySqlParamStore {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            params: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, value: &Value) {
        self.params.push(MySqlParam::from_value(value));
    }

    pub fn params(self) -> Params {
        Params::Positional(self.params.into_iter().map(|p| p.0).collect())
    }
}
