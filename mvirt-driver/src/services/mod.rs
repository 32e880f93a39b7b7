//! Service modules for the driver.
//!
//! - runtime: container runtime client traits and the youki client
//! - handle: per-task lifecycle state and operations
//! - monitor: watches a task for exit and records the result on its handle

pub mod handle;
pub mod monitor;
pub mod runtime;
