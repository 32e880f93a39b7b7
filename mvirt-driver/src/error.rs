//! Error types for the task driver.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by a container runtime client.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime command ran but reported failure.
    #[error("runtime command failed: {0}")]
    Command(String),

    /// The container or task is unknown to the runtime.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime reported something we could not interpret.
    #[error("invalid runtime state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle step during which a runtime call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Wait,
    Start,
    Signal,
    Status,
    Kill,
    DeleteTask,
    DeleteContainer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Wait => "wait",
            Phase::Start => "start",
            Phase::Signal => "signal",
            Phase::Status => "status",
            Phase::Kill => "kill",
            Phase::DeleteTask => "delete task",
            Phase::DeleteContainer => "delete container",
        };
        f.write_str(name)
    }
}

/// Errors returned by task handle operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A runtime call failed. The runtime error is carried unchanged.
    #[error("{phase} failed: {source}")]
    Runtime {
        phase: Phase,
        #[source]
        source: RuntimeError,
    },

    /// The orchestrator signal has no equivalent in the runtime's signal model.
    #[error("unsupported signal: {0}")]
    UnsupportedSignal(i32),

    /// The exit monitor did not report readiness before the start deadline.
    #[error("exit monitor not ready after {0:?}")]
    MonitorNotReady(Duration),
}

impl DriverError {
    pub(crate) fn runtime(phase: Phase) -> impl FnOnce(RuntimeError) -> DriverError {
        move |source| DriverError::Runtime { phase, source }
    }

    /// Phase of the failed runtime call, if this is a runtime failure.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DriverError::Runtime { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
