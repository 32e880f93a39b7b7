//! Exit monitor - records a task's exit on its handle.

use super::handle::{ExitResult, TaskHandle};
use crate::error::{DriverError, Phase, Result};
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Background watcher for one task.
pub struct ExitMonitor {
    join: JoinHandle<()>,
}

impl ExitMonitor {
    /// Register an exit watch with the runtime and spawn the watcher.
    ///
    /// Returns once the runtime is watching, after opening the handle's
    /// start gate.
    pub async fn attach(handle: Arc<TaskHandle>) -> Result<Self> {
        let waiter = handle
            .task()
            .wait()
            .await
            .map_err(DriverError::runtime(Phase::Wait))?;
        handle.mark_monitor_ready();

        let join = tokio::spawn(async move {
            let result = match waiter.await {
                Ok(exit) => ExitResult::from_exit(exit.exit_code, exit.signal),
                Err(_) => {
                    error!("Monitor: Exit channel for task {} closed", handle.id());
                    ExitResult::lost("exit status lost")
                }
            };
            if !handle.record_exit(result) {
                info!("Monitor: Exit of task {} was already recorded", handle.id());
            }
        });

        Ok(Self { join })
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop watching without recording anything.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the watcher to record the exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await
            && !e.is_cancelled()
        {
            error!("Monitor: Watcher panicked: {e}");
        }
    }
}
