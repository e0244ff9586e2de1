use crate::{
    error::TaskError,
    tasks::{ExitOutcome, NetworkConfig, TaskDefinitionSpec, TaskOrchestrator, TaskState},
};
use model::core::identifiers::{RevisionId, TaskRunId};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
/// Consecutive failed status calls tolerated before a run is abandoned.
pub const MAX_MISSED_POLLS: usize = 5;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Stop the remote task when polling gives up on it (timeout,
    /// cancellation or repeated status failures). Off by default: the task
    /// is left running.
    pub stop_on_abandon: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            stop_on_abandon: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunReport {
    pub revision: RevisionId,
    pub run_id: TaskRunId,
    pub outcome: ExitOutcome,
    pub polls: usize,
}

/// Drives one task run from registration to a terminal outcome. It is the
/// only component that polls a run.
#[derive(Clone)]
pub struct TaskLifecycleManager {
    orchestrator: Arc<dyn TaskOrchestrator>,
    settings: LifecycleSettings,
}

impl TaskLifecycleManager {
    pub fn new(orchestrator: Arc<dyn TaskOrchestrator>, settings: LifecycleSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub async fn register(&self, spec: &TaskDefinitionSpec) -> Result<RevisionId, TaskError> {
        let revision = self.orchestrator.register(spec).await?;
        info!(family = %spec.family, %revision, "Registered task definition");
        Ok(revision)
    }

    pub async fn launch(
        &self,
        revision: &RevisionId,
        network: &NetworkConfig,
    ) -> Result<TaskRunId, TaskError> {
        let run_id = self.orchestrator.launch(revision, network).await?;
        info!(%revision, %run_id, "Launched task");
        Ok(run_id)
    }

    /// Polls until the run is `STOPPED`, the timeout elapses, or `cancel`
    /// fires. The first poll happens immediately; each following poll waits
    /// `poll_interval`, shortened so the last wait ends at the deadline.
    /// Both the deadline and `cancel` also cut short a status call in
    /// flight. A failed status call counts as a missed poll; after
    /// `MAX_MISSED_POLLS` in a row the run is abandoned and the error
    /// returned.
    pub async fn await_termination(
        &self,
        run_id: &TaskRunId,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(ExitOutcome, usize), TaskError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut polls = 0usize;
        let mut missed = 0usize;

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(ExitOutcome::Cancelled);
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(ExitOutcome::Cancelled),
                polled = timeout_at(deadline, self.orchestrator.describe(run_id)) => polled,
            };
            polls += 1;

            match polled {
                Err(_) => {
                    break Ok(ExitOutcome::TimedOut {
                        waited: started.elapsed(),
                    });
                }
                Ok(Ok(status)) => {
                    missed = 0;
                    debug!(%run_id, state = %status.state, polls, "Polled task");
                    if status.state == TaskState::Stopped {
                        break Ok(ExitOutcome::from_stopped(&status));
                    }
                }
                Ok(Err(err)) => {
                    missed += 1;
                    if missed >= MAX_MISSED_POLLS {
                        break Err(err);
                    }
                    warn!(%run_id, %err, missed, "Task status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break Ok(ExitOutcome::TimedOut {
                    waited: now - started,
                });
            }

            let wait = poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => break Ok(ExitOutcome::Cancelled),
                _ = sleep(wait) => {}
            }
        };

        match &result {
            Ok(ExitOutcome::Success) => info!(%run_id, polls, "Task succeeded"),
            Ok(ExitOutcome::Failure { exit_code, reason }) => {
                warn!(%run_id, ?exit_code, ?reason, "Task failed")
            }
            Ok(ExitOutcome::TimedOut { waited }) => {
                warn!(%run_id, waited_secs = waited.as_secs(), "Task did not stop before the timeout");
                self.abandon(run_id, "timed out waiting for task").await;
            }
            Ok(ExitOutcome::Cancelled) => {
                warn!(%run_id, "Stopped polling task after cancellation");
                self.abandon(run_id, "polling cancelled").await;
            }
            Err(err) => {
                warn!(%run_id, %err, polls, "Giving up on task after repeated status failures");
                self.abandon(run_id, "task status unavailable").await;
            }
        }

        result.map(|outcome| (outcome, polls))
    }

    async fn abandon(&self, run_id: &TaskRunId, reason: &str) {
        if !self.settings.stop_on_abandon {
            info!(%run_id, "Leaving remote task running");
            return;
        }
        match self.orchestrator.stop(run_id, reason).await {
            Ok(()) => info!(%run_id, reason, "Requested remote task stop"),
            Err(err) => warn!(%run_id, %err, "Failed to stop abandoned task"),
        }
    }

    /// Register, launch, and wait with the configured interval and timeout.
    /// The outcome is returned as-is; a failed run is never retried here.
    pub async fn run(
        &self,
        spec: &TaskDefinitionSpec,
        network: &NetworkConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskRunReport, TaskError> {
        let revision = self.register(spec).await?;
        let run_id = self.launch(&revision, network).await?;
        let (outcome, polls) = self
            .await_termination(
                &run_id,
                self.settings.poll_interval,
                self.settings.timeout,
                cancel,
            )
            .await?;

        Ok(TaskRunReport {
            revision,
            run_id,
            outcome,
            polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskStatus;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::Mutex,
    };

    /// Replays a scripted sequence of statuses; the last one repeats forever.
    /// The first `failing` status calls error out before the script starts.
    struct ScriptedOrchestrator {
        script: Mutex<VecDeque<TaskStatus>>,
        failing: Mutex<usize>,
        polled_at: Mutex<Vec<Instant>>,
        stopped: Mutex<Vec<String>>,
    }

    impl ScriptedOrchestrator {
        fn new(script: Vec<TaskStatus>) -> Arc<Self> {
            Self::failing_first(0, script)
        }

        fn failing_first(failing: usize, script: Vec<TaskStatus>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                failing: Mutex::new(failing),
                polled_at: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskOrchestrator for ScriptedOrchestrator {
        async fn register(&self, spec: &TaskDefinitionSpec) -> Result<RevisionId, TaskError> {
            Ok(RevisionId::new(format!("{}:1", spec.family)))
        }

        async fn launch(
            &self,
            _revision: &RevisionId,
            _network: &NetworkConfig,
        ) -> Result<TaskRunId, TaskError> {
            Ok(TaskRunId::new("run-1"))
        }

        async fn describe(&self, run: &TaskRunId) -> Result<TaskStatus, TaskError> {
            self.polled_at.lock().unwrap().push(Instant::now());
            {
                let mut failing = self.failing.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(TaskError::StatusUnavailable {
                        run_id: run.to_string(),
                        message: "Rate exceeded".into(),
                    });
                }
            }
            let mut script = self.script.lock().unwrap();
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            Ok(status.unwrap_or_else(TaskStatus::pending))
        }

        async fn stop(&self, run: &TaskRunId, _reason: &str) -> Result<(), TaskError> {
            self.stopped.lock().unwrap().push(run.to_string());
            Ok(())
        }
    }

    /// Every status call hangs for `delay` before reporting RUNNING.
    struct SlowOrchestrator {
        delay: Duration,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskOrchestrator for SlowOrchestrator {
        async fn register(&self, spec: &TaskDefinitionSpec) -> Result<RevisionId, TaskError> {
            Ok(RevisionId::new(format!("{}:1", spec.family)))
        }

        async fn launch(
            &self,
            _revision: &RevisionId,
            _network: &NetworkConfig,
        ) -> Result<TaskRunId, TaskError> {
            Ok(TaskRunId::new("run-1"))
        }

        async fn describe(&self, _run: &TaskRunId) -> Result<TaskStatus, TaskError> {
            sleep(self.delay).await;
            Ok(TaskStatus::running())
        }

        async fn stop(&self, run: &TaskRunId, _reason: &str) -> Result<(), TaskError> {
            self.stopped.lock().unwrap().push(run.to_string());
            Ok(())
        }
    }

    fn slow(delay: Duration) -> Arc<SlowOrchestrator> {
        Arc::new(SlowOrchestrator {
            delay,
            stopped: Mutex::new(Vec::new()),
        })
    }

    fn manager(orch: Arc<dyn TaskOrchestrator>, stop_on_abandon: bool) -> TaskLifecycleManager {
        TaskLifecycleManager::new(
            orch,
            LifecycleSettings {
                poll_interval: Duration::from_secs(3),
                timeout: Duration::from_secs(30),
                stop_on_abandon,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_three_polls() {
        let orch = ScriptedOrchestrator::new(vec![
            TaskStatus::pending(),
            TaskStatus::running(),
            TaskStatus::stopped(Some(0)),
        ]);
        let mgr = manager(orch.clone(), false);

        let start = Instant::now();
        let (outcome, polls) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(3),
                Duration::from_secs(30),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Success);
        assert_eq!(polls, 3);
        let polled_at = orch.polled_at.lock().unwrap().clone();
        let offsets: Vec<_> = polled_at.iter().map(|t| t.duration_since(start)).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(3), Duration::from_secs(6)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_interval() {
        let orch = ScriptedOrchestrator::new(vec![TaskStatus::running()]);
        let mgr = manager(orch.clone(), false);

        let start = Instant::now();
        let (outcome, _) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(4),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExitOutcome::TimedOut { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(14));
        assert!(orch.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonzero_exit_is_failure() {
        let orch = ScriptedOrchestrator::new(vec![TaskStatus {
            state: TaskState::Stopped,
            exit_code: Some(137),
            stopped_reason: Some("OutOfMemory".into()),
        }]);
        let mgr = manager(orch, false);

        let (outcome, polls) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(3),
                Duration::from_secs(30),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(polls, 1);
        assert_eq!(
            outcome,
            ExitOutcome::Failure {
                exit_code: Some(137),
                reason: Some("OutOfMemory".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_leaves_task_running_by_default() {
        let orch = ScriptedOrchestrator::new(vec![TaskStatus::running()]);
        let mgr = manager(orch.clone(), false);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let (outcome, polls) = mgr
            .await_termination(&TaskRunId::new("run-1"), Duration::from_secs(3), Duration::from_secs(30), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Cancelled);
        assert_eq!(polls, 2);
        assert!(orch.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_abandon() {
        let orch = ScriptedOrchestrator::new(vec![TaskStatus::pending()]);
        let mgr = manager(orch.clone(), true);

        let (outcome, _) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(1),
                Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExitOutcome::TimedOut { .. }));
        assert_eq!(*orch.stopped.lock().unwrap(), vec!["run-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_revision_and_outcome() {
        let orch = ScriptedOrchestrator::new(vec![TaskStatus::running(), TaskStatus::stopped(Some(0))]);
        let mgr = manager(orch, false);
        let spec = TaskDefinitionSpec {
            family: "extract-orders".into(),
            task_role_arn: "arn:task".into(),
            execution_role_arn: "arn:exec".into(),
            container_name: "etl".into(),
            image: "etl:latest".into(),
            command: "sluice extract".into(),
            log_group: "/ecs/etl".into(),
            log_stream_prefix: "etl".into(),
            cpu: "1024".into(),
            memory: "2048".into(),
        };

        let report = mgr
            .run(&spec, &NetworkConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.revision.as_str(), "extract-orders:1");
        assert_eq!(report.outcome, ExitOutcome::Success);
        assert_eq!(report.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_status_call_still_times_out() {
        let orch = slow(Duration::from_secs(120));
        let mgr = manager(orch.clone(), true);

        let start = Instant::now();
        let (outcome, polls) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(3),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExitOutcome::TimedOut {
                waited: Duration::from_secs(10)
            }
        );
        assert_eq!(polls, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(*orch.stopped.lock().unwrap(), vec!["run-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_status_call() {
        let orch = slow(Duration::from_secs(120));
        let mgr = manager(orch.clone(), false);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let (outcome, polls) = mgr
            .await_termination(&TaskRunId::new("run-1"), Duration::from_secs(3), Duration::from_secs(600), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Cancelled);
        assert_eq!(polls, 0);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert!(orch.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_call_is_a_missed_poll() {
        let orch = ScriptedOrchestrator::failing_first(2, vec![TaskStatus::stopped(Some(0))]);
        let mgr = manager(orch.clone(), false);

        let start = Instant::now();
        let (outcome, polls) = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(3),
                Duration::from_secs(30),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::Success);
        assert_eq!(polls, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_status_failures_stop_the_task() {
        let orch = ScriptedOrchestrator::failing_first(usize::MAX, vec![TaskStatus::running()]);
        let mgr = manager(orch.clone(), true);

        let err = mgr
            .await_termination(
                &TaskRunId::new("run-1"),
                Duration::from_secs(3),
                Duration::from_secs(600),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::StatusUnavailable { .. }));
        assert_eq!(orch.polled_at.lock().unwrap().len(), MAX_MISSED_POLLS);
        assert_eq!(*orch.stopped.lock().unwrap(), vec!["run-1".to_string()]);
    }
}
