//! Task handle lifecycle operations.

use super::{CONTAINER_NAME_ATTR, ExitResult, ResourceUsage, TaskState, TaskStatus};
use crate::config::{HandleConfig, StartGate, StatusErrorPolicy, TaskConfig};
use crate::error::{DriverError, Phase, Result};
use crate::services::runtime::{Container, DeleteOpts, Status, Task};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;

/// Mutable fields, guarded by the handle's state lock.
#[derive(Debug)]
struct HandleState {
    state: TaskState,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    exit_result: Option<ExitResult>,
}

/// Lifecycle handle for one container task.
///
/// The state lock is only held while fields are read or written. Runtime
/// calls and grace-period waits happen outside it, so status snapshots taken
/// during a transition may lag behind the runtime.
pub struct TaskHandle {
    config: TaskConfig,
    container_name: String,
    settings: HandleConfig,
    state: RwLock<HandleState>,
    /// Flipped to true once the exit monitor is watching the task.
    monitor_ready: watch::Sender<bool>,
    /// Flipped to true once an exit has been recorded.
    exited: watch::Sender<bool>,
    container: Arc<dyn Container>,
    task: Arc<dyn Task>,
}

impl TaskHandle {
    pub fn new(
        config: TaskConfig,
        container_name: impl Into<String>,
        container: Arc<dyn Container>,
        task: Arc<dyn Task>,
        settings: HandleConfig,
    ) -> Self {
        Self {
            config,
            container_name: container_name.into(),
            settings,
            state: RwLock::new(HandleState {
                state: TaskState::Pending,
                started_at: Utc::now(),
                completed_at: None,
                exit_result: None,
            }),
            monitor_ready: watch::Sender::new(false),
            exited: watch::Sender::new(false),
            container,
            task,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Snapshot of the handle's state. Never touches the runtime.
    pub fn task_status(&self) -> TaskStatus {
        let state = self.read_state();
        TaskStatus {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            state: state.state,
            started_at: state.started_at,
            completed_at: state.completed_at,
            exit_result: state.exit_result.clone(),
            driver_attributes: HashMap::from([(
                CONTAINER_NAME_ATTR.to_string(),
                self.container_name.clone(),
            )]),
        }
    }

    pub fn is_running(&self) -> bool {
        self.read_state().state == TaskState::Running
    }

    /// Mark the task as running. Ignored once an exit has been recorded.
    pub fn mark_running(&self) {
        let mut state = self.write_state();
        if state.state == TaskState::Pending {
            state.state = TaskState::Running;
            state.started_at = Utc::now();
        }
    }

    /// Record the task's terminal result. Only the first call has an effect;
    /// returns whether this call recorded it.
    pub fn record_exit(&self, result: ExitResult) -> bool {
        {
            let mut state = self.write_state();
            if state.exit_result.is_some() {
                return false;
            }
            info!(
                "Handle: Task {} exited with code {} (signal {})",
                self.config.id, result.exit_code, result.signal
            );
            state.exit_result = Some(result);
            state.completed_at = Some(Utc::now());
            state.state = TaskState::Exited;
        }
        self.exited.send_replace(true);
        true
    }

    /// Resolves once an exit has been recorded.
    pub async fn exited(&self) {
        let mut rx = self.exited.subscribe();
        // The sender lives as long as self, so this only returns on exit.
        let _ = rx.wait_for(|exited| *exited).await;
    }

    /// Resolves once an observed exit has been recorded. A lost exit status
    /// says nothing about the process, so it never resolves for one.
    async fn observed_exit(&self) {
        self.exited().await;
        let lost = self
            .read_state()
            .exit_result
            .as_ref()
            .is_some_and(|r| r.err.is_some());
        if lost {
            std::future::pending::<()>().await;
        }
    }

    /// Called by the exit monitor once it is watching the task.
    pub fn mark_monitor_ready(&self) {
        debug!("Handle: Exit monitor ready for task {}", self.config.id);
        self.monitor_ready.send_replace(true);
    }

    /// Start the task once the exit monitor can observe it.
    pub async fn run(&self) -> Result<()> {
        match self.settings.start_gate {
            StartGate::Grace { secs } => {
                debug!(
                    "Handle: Waiting {}s before starting task {}",
                    secs, self.config.id
                );
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            StartGate::MonitorReady { timeout_secs } => {
                let timeout = Duration::from_secs(timeout_secs);
                let mut ready = self.monitor_ready.subscribe();
                let is_ready = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false);
                if !is_ready {
                    warn!(
                        "Handle: Exit monitor for task {} not ready after {:?}",
                        self.config.id, timeout
                    );
                    return Err(DriverError::MonitorNotReady(timeout));
                }
            }
        }

        info!("Handle: Starting task {}", self.config.id);
        self.task
            .start()
            .await
            .map_err(DriverError::runtime(Phase::Start))
    }

    /// Send `signal`, give the task `timeout` to exit, then SIGKILL it if the
    /// runtime still reports it running.
    pub async fn shutdown(&self, timeout: Duration, signal: Signal) -> Result<()> {
        info!(
            "Handle: Stopping task {} with {} (timeout {:?})",
            self.config.id, signal, timeout
        );
        self.task
            .kill(signal)
            .await
            .map_err(DriverError::runtime(Phase::Signal))?;

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = self.observed_exit() => {
                debug!("Handle: Task {} exited within grace period", self.config.id);
            }
        }

        let status = match self.task.status().await {
            Ok(status) => status,
            Err(e) => match self.settings.status_error_policy {
                StatusErrorPolicy::Abort => return Err(DriverError::runtime(Phase::Status)(e)),
                StatusErrorPolicy::Escalate => {
                    warn!(
                        "Handle: Status query for task {} failed ({}), escalating to SIGKILL",
                        self.config.id, e
                    );
                    return self.force_kill().await;
                }
            },
        };

        if status != Status::Running {
            info!(
                "Handle: Task {} is not running anymore, no need to SIGKILL",
                self.config.id
            );
            return Ok(());
        }

        self.force_kill().await
    }

    async fn force_kill(&self) -> Result<()> {
        warn!("Handle: Sending SIGKILL to task {}", self.config.id);
        self.task
            .kill(Signal::SIGKILL)
            .await
            .map_err(DriverError::runtime(Phase::Kill))
    }

    /// Delete the task, then its container and snapshot.
    pub async fn cleanup(&self) -> Result<()> {
        info!("Handle: Cleaning up task {}", self.config.id);
        let exit = self
            .task
            .delete()
            .await
            .map_err(DriverError::runtime(Phase::DeleteTask))?;
        if let Some(exit) = exit {
            debug!(
                "Handle: Deleted task {} (exit code {})",
                self.config.id, exit.exit_code
            );
        }

        self.container
            .delete(DeleteOpts {
                snapshot_cleanup: true,
            })
            .await
            .map_err(DriverError::runtime(Phase::DeleteContainer))?;

        info!("Handle: Container {} deleted", self.container.id());
        Ok(())
    }

    /// Resource usage stream. `None` means usage is never reported for this
    /// task, which is different from a stream that has not produced yet.
    pub fn stats(&self, interval: Duration) -> Result<Option<ReceiverStream<ResourceUsage>>> {
        debug!(
            "Handle: Stats requested for task {} every {:?}, not supported",
            self.config.id, interval
        );
        Ok(None)
    }

    /// Forward an orchestrator signal number to the task.
    pub async fn signal(&self, sig: i32) -> Result<()> {
        let signal = Signal::try_from(sig).map_err(|_| DriverError::UnsupportedSignal(sig))?;
        info!("Handle: Forwarding {} to task {}", signal, self.config.id);
        self.task
            .kill(signal)
            .await
            .map_err(DriverError::runtime(Phase::Signal))
    }
}
