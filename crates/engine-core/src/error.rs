use connectors::error::{DbError, DriverError};
use model::error::IntegrityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template `{template}` not found under `{root}`")]
    TemplateNotFound { template: String, root: String },

    #[error("template `{template}` references an undefined variable: {detail}")]
    TemplateVariableMissing { template: String, detail: String },

    #[error("template `{template}` failed to render: {detail}")]
    Invalid { template: String, detail: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("source read failed while writing `{key}`: {source}")]
    SourceRead {
        key: String,
        #[source]
        source: DbError,
    },

    #[error("write to `{key}` failed after {attempts} attempt(s): {source}")]
    SinkWrite {
        key: String,
        attempts: usize,
        #[source]
        source: object_store::Error,
    },

    #[error("data integrity violation while writing `{key}`: {source}")]
    DataIntegrity {
        key: String,
        #[source]
        source: IntegrityError,
    },

    #[error("failed to encode rows for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write to `{key}` was cancelled")]
    Cancelled { key: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data integrity violation loading `{table}`: {source}")]
    DataIntegrity {
        table: String,
        #[source]
        source: IntegrityError,
    },

    #[error("truncate of `{table}` failed: {driver}")]
    TruncateFailed {
        table: String,
        driver: DriverError,
        #[source]
        source: DbError,
    },

    #[error("bulk load into `{table}` failed and was rolled back: {driver}")]
    BulkLoadFailed {
        table: String,
        driver: DriverError,
        #[source]
        source: DbError,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task definition `{family}` was rejected: {}{message}", .code.as_deref().map(|c| format!("[{c}] ")).unwrap_or_default())]
    RegistrationRejected {
        family: String,
        code: Option<String>,
        message: String,
    },

    #[error("launch of `{revision}` was rejected: {reason}")]
    LaunchRejected { revision: String, reason: String },

    #[error("status of task `{run_id}` is unavailable: {message}")]
    StatusUnavailable { run_id: String, message: String },

    #[error("failed to stop task `{run_id}`: {message}")]
    StopFailed { run_id: String, message: String },
}
