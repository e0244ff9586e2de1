use crate::config::ConfigError;
use connectors::error::{BrokerError, DbError, DriverError};
use engine_core::error::{LoadError, RenderError, SinkError, TaskError};
use thiserror::Error;

/// Top-level errors of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// The query was rejected before any row was read.
    #[error("query against `{secret}` failed: {driver}")]
    Query {
        secret: String,
        driver: DriverError,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("remote task `{run_id}` failed with exit code {}{}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "<none>".into()), .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    RemoteFailed {
        run_id: String,
        exit_code: Option<i32>,
        reason: Option<String>,
    },

    #[error("remote task `{run_id}` did not stop within {waited_secs}s")]
    RemoteTimedOut { run_id: String, waited_secs: u64 },

    #[error("stopped waiting for remote task `{run_id}` after cancellation")]
    RemoteCancelled { run_id: String },

    #[error("object store error during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: object_store::Error,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },
}

impl PipelineError {
    /// True when the run ended because shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled { .. }
                | PipelineError::RemoteCancelled { .. }
                | PipelineError::Sink(SinkError::Cancelled { .. })
        )
    }
}
