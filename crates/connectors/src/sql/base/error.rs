use std::fmt;
use thiserror::Error;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The source returned a column type we cannot represent.
    #[error("column `{column}` has unsupported type `{type_name}`")]
    UnsupportedType { column: String, type_name: String },

    /// A cell could not be decoded into a [`model::core::value::Value`].
    #[error("failed to decode column `{column}`: {message}")]
    Decode { column: String, message: String },

    /// A column array could not be encoded for the destination driver.
    #[error("failed to encode column `{column}`: {message}")]
    Encode { column: String, message: String },

    #[error("connection is closed")]
    Closed,
}

/// Code and message reported by the database driver, when it gave one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
}

impl DbError {
    pub fn driver_error(&self) -> DriverError {
        match self {
            DbError::Postgres(err) => DriverError {
                code: err.code().map(|c| c.code().to_string()),
                message: err
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| err.to_string()),
            },
            DbError::MySql(mysql_async::Error::Server(server)) => DriverError {
                code: Some(server.code.to_string()),
                message: server.message.clone(),
            },
            DbError::Mssql(tiberius::error::Error::Server(token)) => DriverError {
                code: Some(token.code().to_string()),
                message: token.message().to_string(),
            },
            other => DriverError {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
