//! Test helpers for mvirt-driver integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use mvirt_driver::{
    Container, DeleteOpts, ExitInfo, ExitWaiter, HandleConfig, RuntimeError, Status, Task,
    TaskConfig, TaskHandle,
};
use nix::sys::signal::Signal;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A runtime call observed by the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start,
    Kill(Signal),
    Status,
    Wait,
    DeleteTask,
    DeleteContainer,
}

/// In-memory container runtime that records every call.
///
/// Killing with SIGKILL, or with any signal once `exit_on_signal` is set,
/// makes the fake report the task stopped and fires the exit waiter.
pub struct FakeRuntime {
    calls: Mutex<Vec<(Instant, Call)>>,
    running: Mutex<bool>,
    exit_on_signal: Mutex<bool>,
    deleted: Mutex<bool>,
    exit_tx: Mutex<Option<oneshot::Sender<ExitInfo>>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            running: Mutex::new(false),
            exit_on_signal: Mutex::new(false),
            deleted: Mutex::new(false),
            exit_tx: Mutex::new(None),
        })
    }

    pub fn exit_on_signal(&self, exit: bool) {
        *self.exit_on_signal.lock().unwrap() = exit;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn call_times(&self, call: &Call) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c == call)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn kills(&self) -> Vec<Signal> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Kill(sig) => Some(sig),
                _ => None,
            })
            .collect()
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self, exit_code: i32, signal: i32) {
        *self.running.lock().unwrap() = false;
        if let Some(tx) = self.exit_tx.lock().unwrap().take() {
            let _ = tx.send(ExitInfo {
                exit_code,
                signal,
                exited_at: Utc::now(),
            });
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

#[async_trait]
impl Task for FakeRuntime {
    fn id(&self) -> &str {
        "task-1"
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.record(Call::Start);
        *self.running.lock().unwrap() = true;
        Ok(())
    }

    async fn kill(&self, signal: Signal) -> Result<(), RuntimeError> {
        self.record(Call::Kill(signal));
        if !*self.running.lock().unwrap() {
            return Ok(());
        }
        if signal == Signal::SIGKILL || *self.exit_on_signal.lock().unwrap() {
            self.exit(128 + signal as i32, signal as i32);
        }
        Ok(())
    }

    async fn status(&self) -> Result<Status, RuntimeError> {
        self.record(Call::Status);
        if *self.running.lock().unwrap() {
            Ok(Status::Running)
        } else {
            Ok(Status::Stopped)
        }
    }

    async fn delete(&self) -> Result<Option<ExitInfo>, RuntimeError> {
        self.record(Call::DeleteTask);
        if *self.running.lock().unwrap() {
            return Err(RuntimeError::Command("task is still running".into()));
        }
        Ok(None)
    }

    async fn wait(&self) -> Result<ExitWaiter, RuntimeError> {
        self.record(Call::Wait);
        let (tx, rx) = oneshot::channel();
        *self.exit_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

#[async_trait]
impl Container for FakeRuntime {
    fn id(&self) -> &str {
        "redis-container"
    }

    async fn delete(&self, opts: DeleteOpts) -> Result<(), RuntimeError> {
        self.record(Call::DeleteContainer);
        assert!(opts.snapshot_cleanup, "snapshot cleanup must be requested");
        let mut deleted = self.deleted.lock().unwrap();
        if *deleted {
            return Err(RuntimeError::NotFound("redis-container".into()));
        }
        *deleted = true;
        Ok(())
    }
}

/// Handle for task "task-1" named "redis" backed by `fake`.
pub fn redis_handle(fake: &Arc<FakeRuntime>, settings: HandleConfig) -> Arc<TaskHandle> {
    Arc::new(TaskHandle::new(
        TaskConfig::new("task-1", "redis"),
        "redis-container",
        fake.clone(),
        fake.clone(),
        settings,
    ))
}
