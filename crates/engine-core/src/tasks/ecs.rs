use crate::{
    error::TaskError,
    tasks::{NetworkConfig, TaskDefinitionSpec, TaskOrchestrator, TaskState, TaskStatus},
};
use async_trait::async_trait;
use aws_sdk_ecs::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata},
    types::{
        AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, Failure,
        LaunchType, LogConfiguration, LogDriver, NetworkConfiguration, NetworkMode,
    },
};
use model::core::identifiers::{RevisionId, TaskRunId};
use tracing::debug;

/// [`TaskOrchestrator`] backed by ECS on Fargate.
#[derive(Clone, Debug)]
pub struct EcsOrchestrator {
    client: Client,
    cluster: String,
    region: String,
}

impl EcsOrchestrator {
    pub fn new(client: Client, cluster: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            region: region.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn container_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> Result<ContainerDefinition, TaskError> {
        let logs = LogConfiguration::builder()
            .log_driver(LogDriver::Awslogs)
            .options("awslogs-group", &spec.log_group)
            .options("awslogs-region", &self.region)
            .options("awslogs-stream-prefix", &spec.log_stream_prefix)
            .build()
            .map_err(|err| TaskError::RegistrationRejected {
                family: spec.family.clone(),
                code: None,
                message: err.to_string(),
            })?;

        Ok(ContainerDefinition::builder()
            .name(&spec.container_name)
            .image(&spec.image)
            .entry_point("sh")
            .entry_point("-c")
            .command(&spec.command)
            .essential(true)
            .log_configuration(logs)
            .build())
    }
}

#[async_trait]
impl TaskOrchestrator for EcsOrchestrator {
    async fn register(&self, spec: &TaskDefinitionSpec) -> Result<RevisionId, TaskError> {
        let container = self.container_definition(spec)?;
        let out = self
            .client
            .register_task_definition()
            .family(&spec.family)
            .task_role_arn(&spec.task_role_arn)
            .execution_role_arn(&spec.execution_role_arn)
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .cpu(&spec.cpu)
            .memory(&spec.memory)
            .container_definitions(container)
            .send()
            .await
            .map_err(|err| TaskError::RegistrationRejected {
                family: spec.family.clone(),
                code: err.code().map(str::to_string),
                message: err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
            })?;

        out.task_definition()
            .and_then(|def| def.task_definition_arn())
            .map(RevisionId::new)
            .ok_or_else(|| TaskError::RegistrationRejected {
                family: spec.family.clone(),
                code: None,
                message: "response carried no task definition ARN".into(),
            })
    }

    async fn launch(
        &self,
        revision: &RevisionId,
        network: &NetworkConfig,
    ) -> Result<TaskRunId, TaskError> {
        let rejected = |reason: String| TaskError::LaunchRejected {
            revision: revision.to_string(),
            reason,
        };

        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(network.subnets.clone()))
            .set_security_groups(Some(network.security_groups.clone()))
            .assign_public_ip(if network.assign_public_ip {
                AssignPublicIp::Enabled
            } else {
                AssignPublicIp::Disabled
            })
            .build()
            .map_err(|err| rejected(err.to_string()))?;

        let out = self
            .client
            .run_task()
            .cluster(&self.cluster)
            .task_definition(revision.as_str())
            .launch_type(LaunchType::Fargate)
            .count(1)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc)
                    .build(),
            )
            .send()
            .await
            .map_err(|err| rejected(DisplayErrorContext(&err).to_string()))?;

        if !out.failures().is_empty() {
            return Err(rejected(failure_summary(out.failures())));
        }

        out.tasks()
            .first()
            .and_then(|task| task.task_arn())
            .map(TaskRunId::new)
            .ok_or_else(|| rejected("no task was started".into()))
    }

    async fn describe(&self, run: &TaskRunId) -> Result<TaskStatus, TaskError> {
        let unavailable = |message: String| TaskError::StatusUnavailable {
            run_id: run.to_string(),
            message,
        };

        let out = self
            .client
            .describe_tasks()
            .cluster(&self.cluster)
            .tasks(run.as_str())
            .send()
            .await
            .map_err(|err| unavailable(DisplayErrorContext(&err).to_string()))?;

        let Some(task) = out.tasks().first() else {
            return Err(unavailable(if out.failures().is_empty() {
                "task not found".into()
            } else {
                failure_summary(out.failures())
            }));
        };

        let last_status = task.last_status().unwrap_or("PENDING");
        debug!(run_id = %run, last_status, "Described task");

        let state = TaskState::from_last_status(last_status);
        let exit_code = task
            .containers()
            .iter()
            .find_map(|container| container.exit_code());

        Ok(TaskStatus {
            state,
            exit_code: if state == TaskState::Stopped {
                exit_code
            } else {
                None
            },
            stopped_reason: task.stopped_reason().map(str::to_string),
        })
    }

    async fn stop(&self, run: &TaskRunId, reason: &str) -> Result<(), TaskError> {
        self.client
            .stop_task()
            .cluster(&self.cluster)
            .task(run.as_str())
            .reason(reason)
            .send()
            .await
            .map_err(|err| TaskError::StopFailed {
                run_id: run.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            })?;
        Ok(())
    }
}

fn failure_summary(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| match (f.arn(), f.reason()) {
            (Some(arn), Some(reason)) => format!("{arn}: {reason}"),
            (None, Some(reason)) => reason.to_string(),
            (Some(arn), None) => format!("{arn}: unknown failure"),
            (None, None) => "unknown failure".to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary() {
        let failures = vec![
            Failure::builder()
                .arn("arn:aws:ecs:subnet")
                .reason("RESOURCE:ENI")
                .build(),
            Failure::builder().reason("AGENT").build(),
        ];
        assert_eq!(
            failure_summary(&failures),
            "arn:aws:ecs:subnet: RESOURCE:ENI; AGENT"
        );
    }
}
