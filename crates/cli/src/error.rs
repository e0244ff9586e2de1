use engine_runtime::{config::ConfigError, error::PipelineError};
use model::error::TimestampError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Invalid execution timestamp: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Invalid load date `{0}`, expected YYYY-MM-DD")]
    LoadDate(String),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CliError::Pipeline(err) if err.is_cancelled())
    }
}
