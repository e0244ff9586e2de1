use crate::sql::base::error::DbError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use model::core::value::Value;
use rust_decimal::Decimal as RustDecimal;
use serde_json::Value as JsonValue;
use std::{
    error::Error,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};
use tokio_postgres::{
    Column, Row,
    types::{FromSql, Kind, Type},
};
use uuid::Uuid;

/// Decodes every cell of a row according to its column's Postgres type.
pub fn decode_row(row: &Row) -> Result<Vec<Value>, DbError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_cell(row, idx, column))
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, DbError> {
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

fn decode_cell(row: &Row, idx: usize, column: &Column) -> Result<Value, DbError> {
    let value = match column.type_().name() {
        "bool" => get::<bool>(row, idx)?.map(Value::Boolean),
        "int2" => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        "int4" => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        "int8" => get::<i64>(row, idx)?.map(Value::Int),
        "oid" => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        "float4" => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        "float8" => get::<f64>(row, idx)?.map(Value::Float),
        "numeric" => match get::<RustDecimal>(row, idx)? {
            Some(d) => Some(Value::Decimal(BigDecimal::from_str(&d.to_string()).map_err(
                |err| DbError::Decode {
                    column: column.name().to_string(),
                    message: err.to_string(),
                },
            )?)),
            None => None,
        },
        "text" | "varchar" | "bpchar" | "name" | "citext" | "unknown" => {
            get::<String>(row, idx)?.map(Value::String)
        }
        "json" | "jsonb" => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        "uuid" => get::<Uuid>(row, idx)?.map(Value::Uuid),
        "bytea" => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        "date" => get::<NaiveDate>(row, idx)?.map(Value::Date),
        "time" => get::<NaiveTime>(row, idx)?.map(|t| Value::String(t.to_string())),
        "timestamp" => get::<NaiveDateTime>(row, idx)?.map(Value::TimestampNaive),
        "timestamptz" => get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp),
        _ => match column.type_().kind() {
            Kind::Array(element) => decode_array(row, idx, column, element)?,
            _ => match get::<WireBytes>(row, idx)? {
                Some(WireBytes(raw)) => Some(decode_wire(column, raw)?),
                None => None,
            },
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// A cell of any type as its undecoded binary-format bytes.
struct WireBytes<'a>(&'a [u8]);

impl<'a> FromSql<'a> for WireBytes<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(WireBytes(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Types the driver has no conversion for, rendered the way `psql` shows
/// them. Enums and `xml` travel as plain text.
fn decode_wire(column: &Column, raw: &[u8]) -> Result<Value, DbError> {
    let ty = column.type_();
    let rendered = match ty.name() {
        "interval" => interval_text(raw),
        "timetz" => timetz_text(raw),
        "inet" | "cidr" => inet_text(raw),
        "money" => {
            return be_i64(raw, 0)
                .map(|cents| Value::Decimal(BigDecimal::new(cents.into(), 2)))
                .ok_or_else(|| malformed(column, raw));
        }
        "xml" => std::str::from_utf8(raw).ok().map(str::to_string),
        _ if matches!(ty.kind(), Kind::Enum(_)) => std::str::from_utf8(raw).ok().map(str::to_string),
        other => {
            return Err(DbError::UnsupportedType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            });
        }
    };
    rendered
        .map(Value::String)
        .ok_or_else(|| malformed(column, raw))
}

fn malformed(column: &Column, raw: &[u8]) -> DbError {
    DbError::Decode {
        column: column.name().to_string(),
        message: format!("malformed {} value ({} bytes)", column.type_().name(), raw.len()),
    }
}

/// One-dimensional arrays become JSON arrays; NULL elements stay null.
fn decode_array(
    row: &Row,
    idx: usize,
    column: &Column,
    element: &Type,
) -> Result<Option<Value>, DbError> {
    let items = match element.name() {
        "bool" => json_items(row, idx, JsonValue::Bool)?,
        "int2" => json_items(row, idx, |v: i16| JsonValue::from(v))?,
        "int4" => json_items(row, idx, |v: i32| JsonValue::from(v))?,
        "int8" => json_items(row, idx, |v: i64| JsonValue::from(v))?,
        "float4" => json_items(row, idx, |v: f32| JsonValue::from(v))?,
        "float8" => json_items(row, idx, |v: f64| JsonValue::from(v))?,
        "numeric" => json_items(row, idx, |v: RustDecimal| JsonValue::String(v.to_string()))?,
        "text" | "varchar" | "bpchar" | "name" => json_items(row, idx, JsonValue::String)?,
        "json" | "jsonb" => json_items(row, idx, |v: JsonValue| v)?,
        "uuid" => json_items(row, idx, |v: Uuid| JsonValue::String(v.to_string()))?,
        "date" => json_items(row, idx, |v: NaiveDate| JsonValue::String(Value::Date(v).to_text()))?,
        "timestamp" => json_items(row, idx, |v: NaiveDateTime| {
            JsonValue::String(Value::TimestampNaive(v).to_text())
        })?,
        "timestamptz" => json_items(row, idx, |v: DateTime<Utc>| {
            JsonValue::String(Value::Timestamp(v).to_text())
        })?,
        other => {
            return Err(DbError::UnsupportedType {
                column: column.name().to_string(),
                type_name: format!("{other}[]"),
            });
        }
    };
    Ok(items.map(Value::Json))
}

fn json_items<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    to_json: impl Fn(T) -> JsonValue,
) -> Result<Option<JsonValue>, DbError> {
    Ok(get::<Vec<Option<T>>>(row, idx)?.map(|items| {
        JsonValue::Array(
            items
                .into_iter()
                .map(|item| item.map_or(JsonValue::Null, &to_json))
                .collect(),
        )
    }))
}

fn be_i64(raw: &[u8], at: usize) -> Option<i64> {
    Some(i64::from_be_bytes(raw.get(at..at + 8)?.try_into().ok()?))
}

fn be_i32(raw: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_be_bytes(raw.get(at..at + 4)?.try_into().ok()?))
}

/// `interval` wire format: microseconds, days, months.
fn interval_text(raw: &[u8]) -> Option<String> {
    if raw.len() != 16 {
        return None;
    }
    let micros = be_i64(raw, 0)?;
    let days = be_i32(raw, 8)?;
    let months = be_i32(raw, 12)?;

    let mut parts = Vec::new();
    for (n, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if n != 0 {
            parts.push(if n == 1 {
                format!("{n} {unit}")
            } else {
                format!("{n} {unit}s")
            });
        }
    }
    if micros != 0 || parts.is_empty() {
        parts.push(clock_text(micros));
    }
    Some(parts.join(" "))
}

/// `HH:MM:SS[.ffffff]`, hours unbounded, trailing fraction zeros trimmed.
fn clock_text(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let (h, m, s, frac) = (
        abs / 3_600_000_000,
        abs / 60_000_000 % 60,
        abs / 1_000_000 % 60,
        abs % 1_000_000,
    );
    let mut text = format!("{sign}{h:02}:{m:02}:{s:02}");
    if frac > 0 {
        let digits = format!("{frac:06}");
        text.push('.');
        text.push_str(digits.trim_end_matches('0'));
    }
    text
}

/// `timetz` wire format: microseconds since midnight, then the zone as
/// seconds west of UTC.
fn timetz_text(raw: &[u8]) -> Option<String> {
    if raw.len() != 12 {
        return None;
    }
    let micros = be_i64(raw, 0)?;
    let offset = be_i32(raw, 8)?.checked_neg()?;

    let sign = if offset < 0 { '-' } else { '+' };
    let abs = offset.unsigned_abs();
    let mut zone = format!("{sign}{:02}", abs / 3600);
    if abs % 3600 != 0 {
        zone.push_str(&format!(":{:02}", abs / 60 % 60));
    }
    if abs % 60 != 0 {
        zone.push_str(&format!(":{:02}", abs % 60));
    }
    Some(format!("{}{zone}", clock_text(micros)))
}

/// `inet`/`cidr` wire format: family, prefix bits, cidr flag, address
/// length, address. The prefix is shown for `cidr` and partial masks.
fn inet_text(raw: &[u8]) -> Option<String> {
    let (&family, rest) = raw.split_first()?;
    let (&bits, rest) = rest.split_first()?;
    let (&is_cidr, rest) = rest.split_first()?;
    let (&len, addr) = rest.split_first()?;
    if addr.len() != usize::from(len) {
        return None;
    }

    let (ip, full) = match family {
        2 => (IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?)), 32),
        3 => (IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?)), 128),
        _ => return None,
    };
    Some(if is_cidr != 0 || bits != full {
        format!("{ip}/{bits}")
    } else {
        ip.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        raw
    }

    fn timetz(micros: i64, zone_west: i32) -> Vec<u8> {
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend_from_slice(&zone_west.to_be_bytes());
        raw
    }

    #[test]
    fn test_interval_text() {
        let hms = (4 * 3600 + 5 * 60 + 6) * 1_000_000;
        assert_eq!(
            interval_text(&interval(hms + 500_000, 3, 14)).unwrap(),
            "1 year 2 mons 3 days 04:05:06.5"
        );
        assert_eq!(interval_text(&interval(0, 1, 0)).unwrap(), "1 day");
        assert_eq!(interval_text(&interval(0, 0, 0)).unwrap(), "00:00:00");
        assert_eq!(interval_text(&interval(-90 * 1_000_000, 0, 0)).unwrap(), "-00:01:30");
        assert_eq!(interval_text(&[0; 8]), None);
    }

    #[test]
    fn test_timetz_text() {
        assert_eq!(
            timetz_text(&timetz(10 * 3_600_000_000, -(5 * 3600 + 30 * 60))).unwrap(),
            "10:00:00+05:30"
        );
        assert_eq!(timetz_text(&timetz(0, 7200)).unwrap(), "00:00:00-02");
    }

    #[test]
    fn test_inet_text() {
        assert_eq!(inet_text(&[2, 32, 0, 4, 10, 0, 0, 1]).unwrap(), "10.0.0.1");
        assert_eq!(inet_text(&[2, 24, 1, 4, 192, 168, 1, 0]).unwrap(), "192.168.1.0/24");

        let mut v6 = vec![3, 128, 0, 16];
        v6.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        assert_eq!(inet_text(&v6).unwrap(), "::1");

        assert_eq!(inet_text(&[2, 32, 0, 4, 10, 0]), None);
    }
}
