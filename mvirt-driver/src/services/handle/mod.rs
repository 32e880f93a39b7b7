//! Task handle - lifecycle state of one supervised container task.
//!
//! The handle keeps the orchestrator-visible state (process state,
//! timestamps, exit result) and drives the runtime's container and task
//! objects for start, signal, shutdown and cleanup.

mod lifecycle;

pub use lifecycle::TaskHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Driver attribute key carrying the container's display name.
pub const CONTAINER_NAME_ATTR: &str = "containerName";

/// Orchestrator-visible process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Exited,
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: i32,
    pub oom_killed: bool,
    pub err: Option<String>,
}

impl ExitResult {
    pub fn from_exit(exit_code: i32, signal: i32) -> Self {
        Self {
            exit_code,
            signal,
            oom_killed: false,
            err: None,
        }
    }

    /// Exit whose status could not be determined.
    pub fn lost(reason: impl Into<String>) -> Self {
        Self {
            exit_code: 255,
            signal: 0,
            oom_killed: false,
            err: Some(reason.into()),
        }
    }

    pub fn successful(&self) -> bool {
        self.exit_code == 0 && self.signal == 0 && self.err.is_none()
    }
}

/// Point-in-time snapshot of a handle.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_result: Option<ExitResult>,
    pub driver_attributes: HashMap<String, String>,
}

/// Resource usage sample. No runtime client produces these yet.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub cpu_total_ns: u64,
    pub memory_rss_bytes: u64,
    pub timestamp: DateTime<Utc>,
}
