use crate::sql::base::error::DbError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use model::core::value::Value;
use tiberius::{ColumnData, FromSql, Row};
use uuid::Uuid;

pub fn decode_row(row: Row) -> Result<Vec<Value>, DbError> {
    let names = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>();
    row.into_iter()
        .zip(names)
        .map(|(data, name)| decode_cell(&name, &data))
        .collect()
}

fn temporal<'a, T: FromSql<'a>>(column: &str, data: &'a ColumnData<'static>) -> Result<Option<T>, DbError> {
    T::from_sql(data).map_err(|err| DbError::Decode {
        column: column.to_string(),
        message: err.to_string(),
    })
}

pub fn decode_cell(column: &str, data: &ColumnData<'static>) -> Result<Value, DbError> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|v| Value::Float(v.into())),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(Value::Boolean),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::Uuid(Uuid::from_bytes(*g.as_bytes()))),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Bytes(b.to_vec())),
        ColumnData::Numeric(v) => {
            v.as_ref().map(|n| Value::Decimal(BigDecimal::new(n.value().into(), n.scale().into())))
        }
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| Value::String(xml.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal::<NaiveDateTime>(column, data)?.map(Value::TimestampNaive)
        }
        ColumnData::Date(_) => temporal::<NaiveDate>(column, data)?.map(Value::Date),
        ColumnData::Time(_) => {
            temporal::<NaiveTime>(column, data)?.map(|t| Value::String(t.to_string()))
        }
        ColumnData::DateTimeOffset(_) => {
            temporal::<DateTime<Utc>>(column, data)?.map(Value::Timestamp)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(DbError::UnsupportedType {
                column: column.to_string(),
                type_name: format!("{other:?}"),
            });
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tiberius::numeric::Numeric;

    #[test]
    fn test_scalar_cells() {
        assert_eq!(decode_cell("id", &ColumnData::I32(Some(7))).unwrap(), Value::Int(7));
        assert_eq!(decode_cell("flag", &ColumnData::Bit(None)).unwrap(), Value::Null);
        assert_eq!(
            decode_cell("name", &ColumnData::String(Some(Cow::Borrowed("ana")))).unwrap(),
            Value::String("ana".into())
        );
        assert_eq!(
            decode_cell("blob", &ColumnData::Binary(Some(Cow::Owned(vec![1, 2])))).unwrap(),
            Value::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn test_numeric_keeps_scale() {
        let cell = ColumnData::Numeric(Some(Numeric::new_with_scale(12_345, 2)));
        assert_eq!(decode_cell("amount", &cell).unwrap().to_text(), "123.45");
    }
}
