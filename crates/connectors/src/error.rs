use thiserror::Error;

pub use crate::sql::base::error::{DbError, DriverError};

/// Failures while fetching or decoding a named secret.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret `{0}` does not exist")]
    NotFound(String),

    #[error("secret `{name}` could not be decrypted: {message}")]
    Decryption { name: String, message: String },

    #[error("secret store rejected `{name}`: {}{message}", .code.as_deref().map(|c| format!("[{c}] ")).unwrap_or_default())]
    Service {
        name: String,
        code: Option<String>,
        message: String,
    },

    #[error("secret `{name}` is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("failed to read secret `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("secret `{secret}` is unavailable: {source}")]
    SecretUnavailable {
        secret: String,
        #[source]
        source: SecretError,
    },

    #[error("connection to database `{database}` at {host} (secret `{secret}`) failed: {driver}")]
    ConnectionFailed {
        secret: String,
        host: String,
        database: String,
        driver: DriverError,
        #[source]
        source: DbError,
    },

    #[error("secret `{secret}` names unsupported driver `{driver}`")]
    UnsupportedDriver { secret: String, driver: String },
}

impl BrokerError {
    /// Driver code and message for connection failures.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            BrokerError::ConnectionFailed { driver, .. } => Some(driver),
            _ => None,
        }
    }
}
