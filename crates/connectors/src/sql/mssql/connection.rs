use crate::{
    broker::ConnectionDescriptor,
    sql::{
        base::{
            connection::{DatabaseKind, RowStream, SqlConnection},
            error::DbError,
            ident::quote_bracketed,
        },
        mssql::{decode::decode_row, params::MssqlParam},
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use model::{core::value::Value, records::columnar::ColumnarBatch};
use std::ops::Range;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

/// The server rejects statements with more than 2100 parameters.
const MAX_PARAMS: usize = 2_000;
/// Upper bound on row constructors in one `VALUES` list.
const MAX_ROWS: usize = 1_000;

type MssqlClient = Client<Compat<TcpStream>>;

pub struct MssqlConnection {
    client: Option<MssqlClient>,
}

pub(crate) fn config_for(descriptor: &ConnectionDescriptor) -> Config {
    let mut config = Config::new();
    config.host(&descriptor.host);
    config.port(descriptor.port);
    config.database(&descriptor.database);
    config.authentication(AuthMethod::sql_server(&descriptor.user, descriptor.password()));

    match descriptor.ssl_mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("disable") => config.encryption(EncryptionLevel::NotSupported),
        Some("verify-ca") | Some("verify-full") => config.encryption(EncryptionLevel::Required),
        Some("require") => {
            config.encryption(EncryptionLevel::Required);
            config.trust_cert();
        }
        // Login-only encryption against whatever certificate the server has.
        _ => {
            config.encryption(EncryptionLevel::Off);
            config.trust_cert();
        }
    }
    config
}

impl MssqlConnection {
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, DbError> {
        let config = config_for(descriptor);
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(Self {
            client: Some(client),
        })
    }

    fn client(&mut self) -> Result<&mut MssqlClient, DbError> {
        self.client.as_mut().ok_or(DbError::Closed)
    }
}

/// Runs a statement batch and discards whatever it returns.
async fn run_batch(client: &mut MssqlClient, sql: &str) -> Result<(), DbError> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Splits `rows` into ranges that stay under both the parameter and the
/// row-constructor limits.
pub fn chunk_ranges(rows: usize, columns: usize) -> Vec<Range<usize>> {
    let per_chunk = (MAX_PARAMS / columns.max(1)).clamp(1, MAX_ROWS);
    (0..rows)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(rows))
        .collect()
}

pub fn insert_sql(table: &str, columns: &[&str], rows: usize) -> String {
    let names = columns
        .iter()
        .map(|c| quote_bracketed(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = (0..rows)
        .map(|row| {
            let slots = (1..=columns.len())
                .map(|col| format!("@P{}", row * columns.len() + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({slots})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({names}) VALUES {values}", quote_bracketed(table))
}

#[async_trait]
impl SqlConnection for MssqlConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mssql
    }

    async fn query_stream<'a>(&'a mut self, sql: &'a str) -> Result<RowStream<'a>, DbError> {
        let mut stream = self.client()?.simple_query(sql).await?;
        let columns = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream
            .into_row_stream()
            .map(|row| row.map_err(DbError::from).and_then(decode_row))
            .boxed();

        Ok(RowStream { columns, rows })
    }

    async fn truncate(&mut self, table: &str) -> Result<u64, DbError> {
        let sql = format!("DELETE FROM {}", quote_bracketed(table));
        debug!(%sql, "Truncating table");
        let result = self.client()?.execute(sql, &[]).await?;
        Ok(result.rows_affected().iter().sum())
    }

    async fn insert_columns(&mut self, table: &str, batch: &ColumnarBatch) -> Result<u64, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let names = batch.column_names().collect::<Vec<_>>();
        let client = self.client()?;
        run_batch(client, "SET XACT_ABORT ON; BEGIN TRANSACTION").await?;
        let mut inserted = 0u64;

        for range in chunk_ranges(batch.len(), names.len()) {
            let sql = insert_sql(table, &names, range.len());
            let mut params = Vec::with_capacity(range.len() * names.len());
            for row in range.clone() {
                for column in &batch.columns {
                    let cell = column.cell(row).unwrap_or(Value::Null);
                    params.push(MssqlParam::from_value(&cell, column.values.kind()));
                }
            }
            let refs = params.iter().map(|p| p as &dyn ToSql).collect::<Vec<_>>();

            debug!(rows = range.len(), "Bulk inserting chunk");
            if let Err(err) = client.execute(sql, &refs).await {
                if let Err(rollback) =
                    run_batch(client, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
                {
                    warn!(%rollback, "Rollback after failed insert also failed");
                }
                return Err(err.into());
            }
            inserted += range.len() as u64;
        }

        run_batch(client, "COMMIT TRANSACTION").await?;
        Ok(inserted)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }
}
