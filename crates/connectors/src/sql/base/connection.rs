use crate::sql::base::error::DbError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use model::{core::value::Value, records::columnar::ColumnarBatch};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    MySql,
    Mssql,
}

impl DatabaseKind {
    /// Maps an ODBC-style driver or engine name to a supported kind.
    pub fn from_driver(driver: &str) -> Option<Self> {
        let driver = driver.to_ascii_lowercase();
        if driver.contains("postgres") || driver == "pg" || driver.contains("psql") {
            Some(DatabaseKind::Postgres)
        } else if driver.contains("mysql") || driver.contains("mariadb") {
            Some(DatabaseKind::MySql)
        } else if driver.contains("sql server")
            || driver.contains("sqlserver")
            || driver.contains("mssql")
            || driver.contains("freetds")
        {
            Some(DatabaseKind::Mssql)
        } else {
            None
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::Postgres => 5432,
            DatabaseKind::MySql => 3306,
            DatabaseKind::Mssql => 1433,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => write!(f, "postgres"),
            DatabaseKind::MySql => write!(f, "mysql"),
            DatabaseKind::Mssql => write!(f, "mssql"),
        }
    }
}

/// Lazily decoded rows of one query. The stream borrows the connection, so
/// the connection cannot be reused until the stream is dropped.
pub struct RowStream<'a> {
    pub columns: Vec<String>,
    pub rows: BoxStream<'a, Result<Vec<Value>, DbError>>,
}

/// A single live connection, owned by exactly one operation at a time.
#[async_trait]
pub trait SqlConnection: Send {
    fn kind(&self) -> DatabaseKind;

    /// Executes `sql` and streams its rows without buffering the result.
    async fn query_stream<'a>(&'a mut self, sql: &'a str) -> Result<RowStream<'a>, DbError>;

    /// Deletes every row of `table` as its own committed statement.
    async fn truncate(&mut self, table: &str) -> Result<u64, DbError>;

    /// Inserts the whole batch inside one transaction. Either every row is
    /// committed or the transaction is rolled back.
    async fn insert_columns(&mut self, table: &str, batch: &ColumnarBatch) -> Result<u64, DbError>;

    async fn close(&mut self) -> Result<(), DbError>;
}
