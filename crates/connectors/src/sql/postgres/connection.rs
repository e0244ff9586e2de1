use crate::{
    broker::ConnectionDescriptor,
    sql::{
        base::{
            connection::{DatabaseKind, RowStream, SqlConnection},
            error::DbError,
            ident::{quote_ident, quote_qualified},
        },
        postgres::{
            decode::decode_row,
            params::PgArrayParam,
            utils::{config_for, connect_client},
        },
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use model::records::columnar::ColumnarBatch;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, types::ToSql};
use tracing::{debug, warn};

pub struct PgConnection {
    client: Option<Client>,
    driver_task: Option<JoinHandle<()>>,
}

impl PgConnection {
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, DbError> {
        let (client, driver_task) = connect_client(config_for(descriptor)).await?;
        Ok(Self {
            client: Some(client),
            driver_task: Some(driver_task),
        })
    }

    fn client(&mut self) -> Result<&mut Client, DbError> {
        self.client.as_mut().ok_or(DbError::Closed)
    }
}

/// `INSERT .. SELECT` over `UNNEST` of one array parameter per column.
/// Columns that are entirely null are inserted as a bare `NULL`, which
/// Postgres coerces to the target column's type.
pub fn insert_sql(table: &str, columns: &[(&str, Option<&'static str>)]) -> String {
    let names = columns
        .iter()
        .map(|(name, _)| quote_ident(name, '"'))
        .collect::<Vec<_>>()
        .join(", ");

    let mut arrays = Vec::new();
    let mut aliases = Vec::new();
    let mut select = Vec::new();
    for (idx, (_, cast)) in columns.iter().enumerate() {
        match cast {
            Some(cast) => {
                arrays.push(format!("${}::{cast}", arrays.len() + 1));
                aliases.push(format!("c{idx}"));
                select.push(format!("u.c{idx}"));
            }
            None => select.push("NULL".to_string()),
        }
    }

    let table = quote_qualified(table, '"');
    if arrays.is_empty() {
        // Only possible when every column is all-null; the row count comes
        // from generate_series instead.
        return format!(
            "INSERT INTO {table} ({names}) SELECT {} FROM generate_series(1, $1::int8)",
            select.join(", ")
        );
    }
    format!(
        "INSERT INTO {table} ({names}) SELECT {} FROM UNNEST({}) AS u({})",
        select.join(", "),
        arrays.join(", "),
        aliases.join(", ")
    )
}

#[async_trait]
impl SqlConnection for PgConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn query_stream<'a>(&'a mut self, sql: &'a str) -> Result<RowStream<'a>, DbError> {
        let client = self.client()?;
        let statement = client.prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = client
            .query_raw(&statement, std::iter::empty::<&(dyn ToSql + Sync)>())
            .await?;
        let rows = rows
            .map(|row| row.map_err(DbError::from).and_then(|row| decode_row(&row)))
            .boxed();

        Ok(RowStream { columns, rows })
    }

    async fn truncate(&mut self, table: &str) -> Result<u64, DbError> {
        let sql = format!("DELETE FROM {}", quote_qualified(table, '"'));
        debug!(%sql, "Truncating table");
        Ok(self.client()?.execute(sql.as_str(), &[]).await?)
    }

    async fn insert_columns(&mut self, table: &str, batch: &ColumnarBatch) -> Result<u64, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let params = batch
            .columns
            .iter()
            .map(PgArrayParam::from_column)
            .collect::<Result<Vec<_>, _>>()?;
        let shape = batch
            .columns
            .iter()
            .zip(&params)
            .map(|(c, p)| (c.name.as_str(), p.as_ref().map(|p| p.cast)))
            .collect::<Vec<_>>();
        let sql = insert_sql(table, &shape);

        let row_count = batch.len() as i64;
        let mut refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .flatten()
            .map(|p| p.as_ref())
            .collect();
        if refs.is_empty() {
            refs.push(&row_count);
        }

        debug!(%sql, rows = batch.len(), "Bulk inserting");
        let tx = self.client()?.transaction().await?;
        match tx.execute(sql.as_str(), &refs).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(%rollback, "Rollback after failed insert also failed");
                }
                Err(err.into())
            }
        }
    }

    async fn close(&mut self) -> Result<(), DbError> {
        drop(self.client.take());
        if let Some(task) = self.driver_task.take()
            && let Err(err) = task.await
        {
            warn!(%err, "Postgres driver task ended abnormally");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_unnest() {
        let sql = insert_sql(
            "public.orders",
            &[("id", Some("int8[]")), ("note", None), ("total", Some("numeric[]"))],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"orders\" (\"id\", \"note\", \"total\") \
             SELECT u.c0, NULL, u.c2 FROM UNNEST($1::int8[], $2::numeric[]) AS u(c0, c2)"
        );
    }

    #[test]
    fn test_insert_sql_all_null() {
        let sql = insert_sql("t", &[("a", None)]);
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"a\") SELECT NULL FROM generate_series(1, $1::int8)"
        );
    }
}
