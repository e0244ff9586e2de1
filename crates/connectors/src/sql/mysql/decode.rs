use crate::sql::base::error::DbError;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use model::core::value::Value;
use mysql_async::{
    Column, Row,
    consts::{ColumnFlags, ColumnType},
    prelude::FromValue,
};

/// Charset id MySQL reports for binary strings and blobs.
const BINARY_CHARSET: u16 = 63;

pub fn decode_row(mut row: Row) -> Result<Vec<Value>, DbError> {
    let columns = row.columns();
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_cell(&mut row, idx, column))
        .collect()
}

fn take<T: FromValue>(row: &mut Row, idx: usize, column: &Column) -> Result<Option<T>, DbError> {
    match row.take_opt::<Option<T>, usize>(idx) {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(DbError::Decode {
            column: column.name_str().into_owned(),
            message: err.to_string(),
        }),
        None => Ok(None),
    }
}

fn decode_cell(row: &mut Row, idx: usize, column: &Column) -> Result<Value, DbError> {
    use ColumnType::*;

    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    let value = match column.column_type() {
        MYSQL_TYPE_NULL => None,
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG
        | MYSQL_TYPE_YEAR => take::<i64>(row, idx, column)?.map(Value::Int),
        MYSQL_TYPE_LONGLONG if unsigned => take::<u64>(row, idx, column)?.map(|v| {
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Decimal(BigDecimal::from(v)))
        }),
        MYSQL_TYPE_LONGLONG => take::<i64>(row, idx, column)?.map(Value::Int),
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => take::<f64>(row, idx, column)?.map(Value::Float),
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => {
            take::<BigDecimal>(row, idx, column)?.map(Value::Decimal)
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => take::<NaiveDate>(row, idx, column)?.map(Value::Date),
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_TIMESTAMP2 => take::<NaiveDateTime>(row, idx, column)?.map(Value::TimestampNaive),
        MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => take::<String>(row, idx, column)?.map(Value::String),
        MYSQL_TYPE_JSON => match take::<String>(row, idx, column)? {
            Some(raw) => Some(Value::Json(serde_json::from_str(&raw).map_err(|err| {
                DbError::Decode {
                    column: column.name_str().into_owned(),
                    message: err.to_string(),
                }
            })?)),
            None => None,
        },
        MYSQL_TYPE_BIT | MYSQL_TYPE_GEOMETRY => take::<Vec<u8>>(row, idx, column)?.map(Value::Bytes),
        MYSQL_TYPE_VARCHAR | MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_STRING | MYSQL_TYPE_ENUM
        | MYSQL_TYPE_SET | MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB
        | MYSQL_TYPE_LONG_BLOB | MYSQL_TYPE_BLOB => {
            if column.character_set() == BINARY_CHARSET {
                take::<Vec<u8>>(row, idx, column)?.map(Value::Bytes)
            } else {
                take::<String>(row, idx, column)?.map(Value::String)
            }
        }
        other => {
            return Err(DbError::UnsupportedType {
                column: column.name_str().into_owned(),
                type_name: format!("{other:?}"),
            });
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
