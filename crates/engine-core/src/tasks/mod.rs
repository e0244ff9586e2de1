pub mod ecs;
pub mod lifecycle;

use crate::error::TaskError;
use async_trait::async_trait;
use model::core::identifiers::{RevisionId, TaskRunId};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Everything needed to register one revision of a containerised task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionSpec {
    pub family: String,
    pub task_role_arn: String,
    pub execution_role_arn: String,
    pub container_name: String,
    pub image: String,
    /// Shell command; the container entry point is `sh -c`.
    pub command: String,
    pub log_group: String,
    pub log_stream_prefix: String,
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Stopped,
}

impl TaskState {
    /// Collapses the orchestrator's `lastStatus` values onto the three
    /// modelled states. Only `STOPPED` is terminal.
    pub fn from_last_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "STOPPED" => TaskState::Stopped,
            "RUNNING" | "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" => TaskState::Running,
            _ => TaskState::Pending,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub stopped_reason: Option<String>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            exit_code: None,
            stopped_reason: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: TaskState::Running,
            ..Self::pending()
        }
    }

    pub fn stopped(exit_code: Option<i32>) -> Self {
        Self {
            state: TaskState::Stopped,
            exit_code,
            stopped_reason: None,
        }
    }
}

/// How a task run ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExitOutcome {
    Success,
    /// Nonzero exit, or the task stopped without reporting an exit code.
    Failure {
        exit_code: Option<i32>,
        reason: Option<String>,
    },
    /// The run never reached `STOPPED` within the timeout.
    TimedOut {
        #[serde(with = "secs")]
        waited: Duration,
    },
    /// Polling was cancelled locally.
    Cancelled,
}

impl ExitOutcome {
    pub fn from_stopped(status: &TaskStatus) -> Self {
        match status.exit_code {
            Some(0) => ExitOutcome::Success,
            code => ExitOutcome::Failure {
                exit_code: code,
                reason: status.stopped_reason.clone(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Client for a container orchestrator.
#[async_trait]
pub trait TaskOrchestrator: Send + Sync {
    /// Registers a new revision; never updates an existing one.
    async fn register(&self, spec: &TaskDefinitionSpec) -> Result<RevisionId, TaskError>;

    async fn launch(
        &self,
        revision: &RevisionId,
        network: &NetworkConfig,
    ) -> Result<TaskRunId, TaskError>;

    async fn describe(&self, run: &TaskRunId) -> Result<TaskStatus, TaskError>;

    async fn stop(&self, run: &TaskRunId, reason: &str) -> Result<(), TaskError>;
}
