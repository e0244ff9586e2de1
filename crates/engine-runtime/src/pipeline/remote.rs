use crate::error::PipelineError;
use engine_core::tasks::{
    ExitOutcome, NetworkConfig, TaskDefinitionSpec,
    lifecycle::{TaskLifecycleManager, TaskRunReport},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs an extraction or load inside a remote container and waits for it.
/// Anything other than a clean exit fails the run; nothing is retried.
pub struct RemoteExecutionPipeline {
    manager: TaskLifecycleManager,
}

impl RemoteExecutionPipeline {
    pub fn new(manager: TaskLifecycleManager) -> Self {
        Self { manager }
    }

    pub async fn run(
        &self,
        spec: &TaskDefinitionSpec,
        network: &NetworkConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskRunReport, PipelineError> {
        info!(family = %spec.family, image = %spec.image, "Starting remote execution");
        let report = self.manager.run(spec, network, cancel).await?;
        let run_id = report.run_id.to_string();

        match &report.outcome {
            ExitOutcome::Success => {
                info!(%run_id, polls = report.polls, "Remote execution succeeded");
                Ok(report)
            }
            ExitOutcome::Failure { exit_code, reason } => {
                error!(%run_id, ?exit_code, ?reason, "Remote execution failed");
                Err(PipelineError::RemoteFailed {
                    run_id,
                    exit_code: *exit_code,
                    reason: reason.clone(),
                })
            }
            ExitOutcome::TimedOut { waited } => Err(PipelineError::RemoteTimedOut {
                run_id,
                waited_secs: waited.as_secs(),
            }),
            ExitOutcome::Cancelled => Err(PipelineError::RemoteCancelled { run_id }),
        }
    }
}
