use crate::sql::base::error::DbError;
use model::records::columnar::{ColumnArray, ColumnValues};
use rust_decimal::Decimal as RustDecimal;
use std::str::FromStr;
use tokio_postgres::types::{Json as PgJson, ToSql};

/// One column of a bulk insert, bound as a single Postgres array parameter.
pub struct PgArrayParam {
    pub cast: &'static str,
    value: Box<dyn ToSql + Sync + Send>,
}

impl PgArrayParam {
    /// Builds the array for a column. The null mask decides which elements
    /// are `NULL`; placeholder values (including NaN) are never bound.
    /// Returns `None` for a column whose every cell is null.
    pub fn from_column(column: &ColumnArray) -> Result<Option<Self>, DbError> {
        fn masked<T: Clone>(column: &ColumnArray, values: &[T]) -> Vec<Option<T>> {
            column.masked(values).map(|v| v.cloned()).collect()
        }

        let param = match &column.values {
            ColumnValues::Int(v) => Self::new("int8[]", masked(column, v)),
            ColumnValues::Float(v) => Self::new("float8[]", masked(column, v)),
            ColumnValues::Decimal(v) => {
                let decimals = column
                    .masked(v)
                    .map(|d| {
                        d.map(|d| RustDecimal::from_str(&d.to_string()))
                            .transpose()
                            .map_err(|err| DbError::Encode {
                                column: column.name.clone(),
                                message: err.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::new("numeric[]", decimals)
            }
            ColumnValues::String(v) => Self::new("text[]", masked(column, v)),
            ColumnValues::Boolean(v) => Self::new("bool[]", masked(column, v)),
            ColumnValues::Json(v) => {
                let docs: Vec<Option<PgJson<serde_json::Value>>> =
                    column.masked(v).map(|j| j.cloned().map(PgJson)).collect();
                Self::new("jsonb[]", docs)
            }
            ColumnValues::Uuid(v) => Self::new("uuid[]", masked(column, v)),
            ColumnValues::Bytes(v) => Self::new("bytea[]", masked(column, v)),
            ColumnValues::Date(v) => Self::new("date[]", masked(column, v)),
            ColumnValues::Timestamp(v) => Self::new("timestamptz[]", masked(column, v)),
            ColumnValues::TimestampNaive(v) => Self::new("timestamp[]", masked(column, v)),
            ColumnValues::Null(_) => return Ok(None),
        };
        Ok(Some(param))
    }

    fn new<T: ToSql + Sync + Send + 'static>(cast: &'static str, value: T) -> Self {
        Self {
            cast,
            value: Box::new(value),
        }
    }
}

impl AsRef<dyn ToSql + Sync> for PgArrayParam {
    fn as_ref(&self) -> &(dyn ToSql + Sync + 'static) {
        &*self.value
    }
}
