//! Driver configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifiers copied from the orchestrator's task configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    pub name: String,
}

impl TaskConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// How `run` decides it is safe to issue the runtime start call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StartGate {
    /// Sleep for a fixed period so the exit monitor has time to attach.
    Grace { secs: u64 },
    /// Wait for the exit monitor to report that it is watching the task.
    MonitorReady { timeout_secs: u64 },
}

impl Default for StartGate {
    fn default() -> Self {
        StartGate::Grace { secs: 5 }
    }
}

/// What shutdown does when the post-wait status query fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusErrorPolicy {
    /// Return the status error without sending the forceful kill.
    #[default]
    Abort,
    /// Send the forceful kill anyway and return its result.
    Escalate,
}

/// Per-handle lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleConfig {
    pub start_gate: StartGate,
    pub status_error_policy: StatusErrorPolicy,
    /// Signal name used for graceful shutdown.
    pub kill_signal: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            start_gate: StartGate::default(),
            status_error_policy: StatusErrorPolicy::default(),
            kill_signal: "SIGTERM".to_string(),
            shutdown_timeout_secs: 5,
        }
    }
}

impl HandleConfig {
    /// Load settings from a JSON file. Absent fields keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Settings for the youki runtime client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to youki binary.
    pub youki_path: PathBuf,
    /// Root directory for youki container state (None = youki's default /run/youki).
    pub youki_root: Option<PathBuf>,
    /// Remove the caller's bundle directory on snapshot cleanup.
    pub remove_bundle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            youki_path: PathBuf::from("youki"),
            youki_root: None,
            remove_bundle: false,
        }
    }
}
