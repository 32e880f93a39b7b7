//! mvirt-driver - orchestrator-side supervisor for a single container task.
//!
//! The driver owns one already-created container/task pair and takes it
//! through its lifecycle: start, status queries, signal forwarding, graceful
//! then forceful shutdown, and teardown of the container resources.
//!
//! ## Architecture
//!
//! - **Runtime**: `Task`/`Container` client traits plus a youki implementation
//! - **Handle**: lifecycle state and operations for one task
//! - **Monitor**: watches the task for exit and records the result

pub mod config;
pub mod error;
pub mod services;
pub mod utils;

pub use config::{Config, HandleConfig, StartGate, StatusErrorPolicy, TaskConfig};
pub use error::{DriverError, Phase, RuntimeError};
pub use services::handle::{
    CONTAINER_NAME_ATTR, ExitResult, ResourceUsage, TaskHandle, TaskState, TaskStatus,
};
pub use services::monitor::ExitMonitor;
pub use services::runtime::{
    Container, DeleteOpts, ExitInfo, ExitWaiter, Status, Task, YoukiContainer, YoukiRuntime,
    YoukiTask,
};
