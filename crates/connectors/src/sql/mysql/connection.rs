use crate::{
    broker::ConnectionDescriptor,
    sql::{
        base::{
            connection::{DatabaseKind, RowStream, SqlConnection},
            error::DbError,
            ident::{quote_ident, quote_qualified},
        },
        mysql::{decode::decode_row, params::MySqlParamStore},
    },
};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use model::{core::value::Value, records::columnar::ColumnarBatch};
use mysql_async::{Conn, OptsBuilder, Row, TxOpts, prelude::Queryable};
use std::ops::Range;
use tracing::{debug, warn};

/// Upper bound on placeholders in one prepared statement.
const MAX_PLACEHOLDERS: usize = 65_535;

pub struct MySqlConnection {
    conn: Option<Conn>,
}

impl MySqlConnection {
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, DbError> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(descriptor.host.clone())
            .tcp_port(descriptor.port)
            .db_name(Some(descriptor.database.clone()))
            .user(Some(descriptor.user.clone()))
            .pass(Some(descriptor.password().to_string()));
        let conn = Conn::new(opts).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Conn, DbError> {
        self.conn.as_mut().ok_or(DbError::Closed)
    }
}

/// Splits `rows` into ranges that keep each statement under the placeholder
/// limit.
pub fn chunk_ranges(rows: usize, columns: usize) -> Vec<Range<usize>> {
    let per_chunk = (MAX_PLACEHOLDERS / columns.max(1)).max(1);
    (0..rows)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(rows))
        .collect()
}

pub fn insert_sql(table: &str, columns: &[&str], rows: usize) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c, '`'))
        .collect::<Vec<_>>()
        .join(", ");
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![tuple.as_str(); rows].join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES {values}",
        quote_qualified(table, '`')
    )
}

#[async_trait]
impl SqlConnection for MySqlConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn query_stream<'a>(&'a mut self, sql: &'a str) -> Result<RowStream<'a>, DbError> {
        let result = self.conn()?.query_iter(sql).await?;
        let columns = result
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();

        let rows = match result.stream_and_drop::<Row>().await? {
            Some(rows) => rows
                .map(|row| row.map_err(DbError::from).and_then(decode_row))
                .boxed(),
            None => stream::empty().boxed(),
        };

        Ok(RowStream { columns, rows })
    }

    async fn truncate(&mut self, table: &str) -> Result<u64, DbError> {
        let sql = format!("DELETE FROM {}", quote_qualified(table, '`'));
        debug!(%sql, "Truncating table");
        let conn = self.conn()?;
        conn.query_drop(sql).await?;
        Ok(conn.affected_rows())
    }

    async fn insert_columns(&mut self, table: &str, batch: &ColumnarBatch) -> Result<u64, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let names = batch.column_names().collect::<Vec<_>>();
        let mut tx = self.conn()?.start_transaction(TxOpts::default()).await?;
        let mut inserted = 0u64;

        for range in chunk_ranges(batch.len(), names.len()) {
            let sql = insert_sql(table, &names, range.len());
            let mut params = MySqlParamStore::with_capacity(range.len() * names.len());
            for row in range.clone() {
                for column in &batch.columns {
                    let cell = column.cell(row).unwrap_or(Value::Null);
                    params.push(&cell);
                }
            }

            debug!(rows = range.len(), "Bulk inserting chunk");
            if let Err(err) = tx.exec_drop(sql, params.params()).await {
                if let Err(rollback) = tx.rollback().await {
                    warn!(%rollback, "Rollback after failed insert also failed");
                }
                return Err(err.into());
            }
            inserted += range.len() as u64;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await?;
        }
        Ok(())
    }
}
