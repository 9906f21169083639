//! Supervision of asynchronous control-plane tasks.
//!
//! Every mutation the control plane accepts returns a task. The driver never
//! proceeds past a mutation before its task has reached a terminal state, and
//! never waits forever: tasks are polled at a fixed interval up to a fixed
//! timeout. The same loop waits for the in-guest agent.

use crate::error::{CoreError, Result};
use pvm_api::{ApiError, Task, TaskStatus, VirtualMachine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between task status polls.
pub const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum time a task may take to reach a terminal state.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between guest agent pings.
pub const AGENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum time to wait for the guest agent after boot.
pub const AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of one probe in a polling loop.
pub(crate) enum Probe<T> {
    Ready(T),
    /// Not there yet, with an optional reason worth reporting on timeout.
    Pending(Option<String>),
}

/// Outcome of a polling loop.
pub(crate) enum Polled<T> {
    Ready(T),
    TimedOut { last_pending: Option<String> },
}

/// Probe until ready or until `timeout` has elapsed.
///
/// The first probe happens immediately. The loop never sleeps past the
/// deadline, and a probe that fails with an error aborts the loop.
pub(crate) async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_pending = None;

    loop {
        match probe().await? {
            Probe::Ready(value) => return Ok(Polled::Ready(value)),
            Probe::Pending(reason) => {
                if reason.is_some() {
                    last_pending = reason;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(Polled::TimedOut { last_pending });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Waits for tasks and for the guest agent.
#[derive(Debug, Clone, Copy)]
pub struct TaskSupervisor {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub agent_poll_interval: Duration,
    pub agent_timeout: Duration,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self {
            poll_interval: TASK_POLL_INTERVAL,
            timeout: TASK_TIMEOUT,
            agent_poll_interval: AGENT_POLL_INTERVAL,
            agent_timeout: AGENT_TIMEOUT,
        }
    }
}

impl TaskSupervisor {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            ..Self::default()
        }
    }

    /// Wait for `task` to reach a terminal state.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TaskFailed`] if the task stopped with a non-OK exit status
    /// - [`CoreError::TaskTimeout`] if it was still running at the deadline
    /// - [`CoreError::Api`] if a status poll itself failed
    pub async fn wait(&self, task: &dyn Task) -> Result<()> {
        let started = Instant::now();
        tracing::debug!(task = %task.id(), "Waiting for task");

        let polled = poll_until(self.poll_interval, self.timeout, || async move {
            Ok::<_, CoreError>(match task.status().await? {
                TaskStatus::Running => Probe::Pending(None),
                TaskStatus::Stopped { exit_status } => Probe::Ready(exit_status),
            })
        })
        .await?;

        match polled {
            Polled::Ready(exit_status) if exit_status == "OK" => {
                tracing::debug!(
                    task = %task.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task finished"
                );
                Ok(())
            }
            Polled::Ready(exit_status) => {
                tracing::warn!(task = %task.id(), exit_status = %exit_status, "Task failed");
                Err(CoreError::TaskFailed {
                    task: task.id().to_string(),
                    exit_status,
                })
            }
            Polled::TimedOut { .. } => {
                tracing::warn!(task = %task.id(), timeout = ?self.timeout, "Task timed out");
                Err(CoreError::TaskTimeout {
                    task: task.id().to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Submit a mutation and wait for the task it returns.
    pub async fn run<F>(&self, label: &str, submit: F) -> Result<()>
    where
        F: Future<Output = pvm_api::Result<Arc<dyn Task>>>,
    {
        let task = submit.await?;
        tracing::debug!(operation = label, task = %task.id(), "Task submitted");
        self.wait(task.as_ref()).await
    }

    /// Ping the guest agent until it answers.
    ///
    /// Only agent errors count as "not yet". Any other failure ends the wait
    /// at once and is returned as is.
    pub async fn wait_for_agent(&self, vm: &dyn VirtualMachine) -> Result<()> {
        let started = Instant::now();
        let polled = poll_until(self.agent_poll_interval, self.agent_timeout, || async move {
            match vm.agent_ping().await {
                Ok(()) => Ok(Probe::Ready(())),
                Err(ApiError::Agent(reason)) => {
                    tracing::trace!(vmid = %vm.id(), reason = %reason, "Guest agent not ready");
                    Ok(Probe::Pending(Some(ApiError::Agent(reason).to_string())))
                }
                Err(e) => Err(CoreError::from(e)),
            }
        })
        .await?;

        match polled {
            Polled::Ready(()) => {
                tracing::debug!(
                    vmid = %vm.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Guest agent ready"
                );
                Ok(())
            }
            Polled::TimedOut { last_pending } => Err(CoreError::AgentUnavailable {
                vmid: vm.id(),
                timeout: self.agent_timeout,
                last_error: last_pending,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pvm_api::{CloneRequest, NetworkInterfaceReport, PowerState, VmConfig, VmId};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Task that reports `Running` a fixed number of times.
    struct ScriptedTask {
        running_polls: u32,
        polls: AtomicU32,
        exit_status: &'static str,
    }

    impl ScriptedTask {
        fn new(running_polls: u32, exit_status: &'static str) -> Self {
            Self {
                running_polls,
                polls: AtomicU32::new(0),
                exit_status,
            }
        }
    }

    #[async_trait]
    impl Task for ScriptedTask {
        fn id(&self) -> &str {
            "UPID:test"
        }

        async fn status(&self) -> pvm_api::Result<TaskStatus> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < self.running_polls {
                Ok(TaskStatus::Running)
            } else {
                Ok(TaskStatus::Stopped {
                    exit_status: self.exit_status.into(),
                })
            }
        }
    }

    struct BrokenTask;

    #[async_trait]
    impl Task for BrokenTask {
        fn id(&self) -> &str {
            "UPID:broken"
        }

        async fn status(&self) -> pvm_api::Result<TaskStatus> {
            Err(ApiError::Transport("connection reset".into()))
        }
    }

    /// VM whose guest agent always answers the same way.
    struct AgentOnlyVm {
        config: VmConfig,
        ping: fn() -> pvm_api::Result<()>,
        pings: AtomicU32,
    }

    impl AgentOnlyVm {
        fn new(ping: fn() -> pvm_api::Result<()>) -> Self {
            Self {
                config: VmConfig::default(),
                ping,
                pings: AtomicU32::new(0),
            }
        }
    }

    fn unsupported<T>() -> pvm_api::Result<T> {
        Err(ApiError::Rejected("unsupported".into()))
    }

    #[async_trait]
    impl VirtualMachine for AgentOnlyVm {
        fn id(&self) -> VmId {
            VmId::new(150)
        }

        fn config(&self) -> &VmConfig {
            &self.config
        }

        async fn clone_vm(&self, _: &CloneRequest) -> pvm_api::Result<(VmId, Arc<dyn Task>)> {
            unsupported()
        }

        async fn start(&self) -> pvm_api::Result<Arc<dyn Task>> {
            unsupported()
        }

        async fn stop(&self) -> pvm_api::Result<Arc<dyn Task>> {
            unsupported()
        }

        async fn reset(&self) -> pvm_api::Result<Arc<dyn Task>> {
            unsupported()
        }

        async fn delete(&self) -> pvm_api::Result<Arc<dyn Task>> {
            unsupported()
        }

        async fn resize_disk(&self, _: &str, _: &str) -> pvm_api::Result<()> {
            unsupported()
        }

        async fn apply_config(&self, _: &str, _: &str) -> pvm_api::Result<Arc<dyn Task>> {
            unsupported()
        }

        async fn ping(&self) -> pvm_api::Result<PowerState> {
            unsupported()
        }

        async fn agent_ping(&self) -> pvm_api::Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            (self.ping)()
        }

        async fn agent_network_interfaces(&self) -> pvm_api::Result<Vec<NetworkInterfaceReport>> {
            unsupported()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_auth_failure_surfaces_immediately() {
        let vm = AgentOnlyVm::new(|| Err(ApiError::Auth("ticket expired".into())));
        let started = Instant::now();
        let err = TaskSupervisor::default().wait_for_agent(&vm).await.unwrap_err();
        assert!(matches!(err, CoreError::Api(ApiError::Auth(_))));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(vm.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_agent_retries_until_deadline() {
        let vm = AgentOnlyVm::new(|| Err(ApiError::Agent("not running".into())));
        let started = Instant::now();
        let err = TaskSupervisor::default().wait_for_agent(&vm).await.unwrap_err();
        match err {
            CoreError::AgentUnavailable { last_error, .. } => {
                assert_eq!(last_error.as_deref(), Some("guest agent error: not running"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(started.elapsed(), AGENT_TIMEOUT);
        assert_eq!(vm.pings.load(Ordering::SeqCst), 301);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_success_after_polls() {
        let task = ScriptedTask::new(3, "OK");
        let started = Instant::now();
        TaskSupervisor::default().wait(&task).await.unwrap();
        assert_eq!(task.polls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reports_failed_exit_status() {
        let task = ScriptedTask::new(0, "command 'qmstart' failed");
        let err = TaskSupervisor::default().wait(&task).await.unwrap_err();
        match err {
            CoreError::TaskFailed { exit_status, .. } => {
                assert_eq!(exit_status, "command 'qmstart' failed")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let task = ScriptedTask::new(u32::MAX, "OK");
        let started = Instant::now();
        let err = TaskSupervisor::default().wait(&task).await.unwrap_err();
        assert!(matches!(err, CoreError::TaskTimeout { timeout, .. } if timeout == TASK_TIMEOUT));
        assert_eq!(started.elapsed(), TASK_TIMEOUT);
        // One poll at t=0 plus one every 5s up to and including the deadline.
        assert_eq!(task.polls.load(Ordering::SeqCst), 61);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_never_sleeps_past_deadline() {
        let task = ScriptedTask::new(u32::MAX, "OK");
        let supervisor = TaskSupervisor::new(Duration::from_secs(7), Duration::from_secs(10));
        let started = Instant::now();
        supervisor.wait(&task).await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(task.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_surfaces_immediately() {
        let started = Instant::now();
        let err = TaskSupervisor::default().wait(&BrokenTask).await.unwrap_err();
        assert!(matches!(err, CoreError::Api(ApiError::Transport(_))));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_propagates_submit_error() {
        let err = TaskSupervisor::default()
            .run("stop", async { Err(ApiError::Rejected("locked".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Api(ApiError::Rejected(_))));
    }
}
