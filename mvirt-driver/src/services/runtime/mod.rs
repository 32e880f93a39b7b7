//! Container runtime client seam.
//!
//! A handle drives its container and task only through these traits, so the
//! lifecycle logic does not care which OCI runtime sits underneath.

pub mod youki;

pub use youki::{YoukiContainer, YoukiRuntime, YoukiTask};

use crate::error::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::sync::oneshot;

/// Task status as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Paused,
    Stopped,
    Unknown,
}

impl Status {
    /// Map an OCI runtime state string onto a status.
    pub fn from_oci(state: &str) -> Self {
        match state {
            "creating" | "created" => Status::Created,
            "running" => Status::Running,
            "paused" => Status::Paused,
            "stopped" => Status::Stopped,
            _ => Status::Unknown,
        }
    }
}

/// How a task's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: i32,
    /// Terminating signal number, 0 when the process exited normally.
    pub signal: i32,
    pub exited_at: DateTime<Utc>,
}

/// Resolves once the task exits. Obtaining one means the runtime is watching.
pub type ExitWaiter = oneshot::Receiver<ExitInfo>;

/// Container deletion options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOpts {
    /// Also remove the container's root filesystem snapshot.
    pub snapshot_cleanup: bool,
}

/// The process running inside a container.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self) -> Result<(), RuntimeError>;

    async fn kill(&self, signal: Signal) -> Result<(), RuntimeError>;

    async fn status(&self) -> Result<Status, RuntimeError>;

    /// Remove the task record. Returns the exit info if the runtime knows it.
    async fn delete(&self) -> Result<Option<ExitInfo>, RuntimeError>;

    /// Begin watching for the task's exit.
    async fn wait(&self) -> Result<ExitWaiter, RuntimeError>;
}

/// The resource envelope hosting a task.
#[async_trait]
pub trait Container: Send + Sync {
    fn id(&self) -> &str;

    async fn delete(&self, opts: DeleteOpts) -> Result<(), RuntimeError>;
}
