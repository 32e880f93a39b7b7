//! youki runtime client.
//!
//! Drives containers through the youki CLI. youki keeps a single record per
//! container, so deleting the task removes the runtime state. Deleting the
//! container removes what the driver left in the bundle; the bundle itself
//! belongs to the caller and is only removed when `remove_bundle` is set.

use super::{Container, DeleteOpts, ExitInfo, ExitWaiter, Status, Task};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::utils::signals::wait_for_child;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Subset of `youki state` output we rely on.
#[derive(Debug, Deserialize)]
struct YoukiState {
    status: String,
    #[serde(default)]
    pid: Option<i32>,
}

/// Shared youki invocation settings.
#[derive(Debug, Clone)]
pub struct YoukiRuntime {
    youki_path: Arc<PathBuf>,
    youki_root: Option<Arc<PathBuf>>,
    remove_bundle: bool,
}

impl YoukiRuntime {
    pub fn new(config: &Config) -> Self {
        Self {
            youki_path: Arc::new(config.youki_path.clone()),
            youki_root: config.youki_root.clone().map(Arc::new),
            remove_bundle: config.remove_bundle,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.youki_path.as_ref());
        if let Some(root) = &self.youki_root {
            cmd.arg("--root").arg(root.as_ref());
        }
        cmd
    }

    /// Run a short-lived youki command and return its stdout.
    async fn run(&self, id: &str, args: &[&str]) -> Result<String, RuntimeError> {
        debug!(
            "Youki: Executing {} {}",
            self.youki_path.display(),
            args.join(" ")
        );

        let output = self
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Command(format!("Failed to execute youki: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(id, &output.status.to_string(), &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn state(&self, id: &str) -> Result<YoukiState, RuntimeError> {
        let stdout = self.run(id, &["state", id]).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| RuntimeError::InvalidState(format!("Failed to parse youki state: {e}")))
    }

    /// Create a container from an OCI bundle. The container process is left
    /// waiting for `start`.
    pub async fn create(
        &self,
        id: &str,
        bundle: &Path,
    ) -> Result<(YoukiContainer, YoukiTask), RuntimeError> {
        let pid_file = pid_file(bundle);
        let bundle_str = bundle.to_string_lossy();
        let pid_file_str = pid_file.to_string_lossy();

        info!("Youki: Creating container {} from {}", id, bundle_str);
        self.run(
            id,
            &[
                "create",
                "--bundle",
                &bundle_str,
                "--pid-file",
                &pid_file_str,
                id,
            ],
        )
        .await?;

        let pid_str = tokio::fs::read_to_string(&pid_file).await?;
        let pid = pid_str
            .trim()
            .parse::<i32>()
            .map_err(|e| RuntimeError::InvalidState(format!("Failed to parse PID: {e}")))?;
        let _ = tokio::fs::remove_file(&pid_file).await;

        info!("Youki: Container {} created with PID {}", id, pid);
        Ok(self.open(id, Some(bundle.to_path_buf()), Some(pid)))
    }

    /// Build client objects for a container youki already knows about.
    pub fn open(
        &self,
        id: &str,
        bundle: Option<PathBuf>,
        pid: Option<i32>,
    ) -> (YoukiContainer, YoukiTask) {
        let container = YoukiContainer {
            runtime: self.clone(),
            id: id.to_string(),
            bundle,
        };
        let task = YoukiTask {
            runtime: self.clone(),
            id: id.to_string(),
            pid,
            last_exit: Arc::new(Mutex::new(None)),
        };
        (container, task)
    }
}

fn pid_file(bundle: &Path) -> PathBuf {
    bundle.join("container.pid")
}

/// Remove a file or directory, treating "already gone" as success.
async fn remove_path(path: &Path, dir: bool) -> Result<(), RuntimeError> {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Map a failed youki invocation onto a runtime error.
fn classify_failure(id: &str, status: &str, stderr: &str) -> RuntimeError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("does not exist") || lower.contains("not found") {
        return RuntimeError::NotFound(id.to_string());
    }
    let msg = format!("youki exited with {status}: {}", stderr.trim());
    error!("Youki: {msg}");
    RuntimeError::Command(msg)
}

/// Task half of a youki container.
pub struct YoukiTask {
    runtime: YoukiRuntime,
    id: String,
    pid: Option<i32>,
    last_exit: Arc<Mutex<Option<ExitInfo>>>,
}

#[async_trait]
impl Task for YoukiTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        info!("Youki: Starting container {}", self.id);
        self.runtime.run(&self.id, &["start", &self.id]).await?;
        Ok(())
    }

    async fn kill(&self, signal: Signal) -> Result<(), RuntimeError> {
        let signal_str = (signal as i32).to_string();
        info!("Youki: Sending {} to container {}", signal, self.id);
        self.runtime
            .run(&self.id, &["kill", &self.id, &signal_str])
            .await?;
        Ok(())
    }

    async fn status(&self) -> Result<Status, RuntimeError> {
        let state = self.runtime.state(&self.id).await?;
        Ok(Status::from_oci(&state.status))
    }

    async fn delete(&self) -> Result<Option<ExitInfo>, RuntimeError> {
        match self.runtime.run(&self.id, &["delete", &self.id]).await {
            Ok(_) => {}
            // A previous cleanup already removed it.
            Err(RuntimeError::NotFound(_)) => {
                warn!("Youki: Container {} already deleted", self.id);
            }
            Err(e) => return Err(e),
        }
        let last = self
            .last_exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(last)
    }

    async fn wait(&self) -> Result<ExitWaiter, RuntimeError> {
        let pid = match self.pid {
            Some(pid) => pid,
            None => self.runtime.state(&self.id).await?.pid.ok_or_else(|| {
                RuntimeError::InvalidState(format!("container {} has no pid", self.id))
            })?,
        };

        let (tx, rx) = oneshot::channel();
        let last_exit = Arc::clone(&self.last_exit);
        let id = self.id.clone();

        // waitpid is a blocking syscall
        tokio::task::spawn_blocking(move || {
            info!("Youki: Waiting for container {} (PID {}) to exit", id, pid);
            let exit = wait_for_child(pid);
            *last_exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit.clone());
            if tx.send(exit).is_err() {
                debug!("Youki: Nobody waiting for exit of {}", id);
            }
        });

        Ok(rx)
    }
}

/// Container half of a youki container.
pub struct YoukiContainer {
    runtime: YoukiRuntime,
    id: String,
    bundle: Option<PathBuf>,
}

#[async_trait]
impl Container for YoukiContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn delete(&self, opts: DeleteOpts) -> Result<(), RuntimeError> {
        // The runtime record went away with the task; make sure of it.
        match self.runtime.state(&self.id).await {
            Err(RuntimeError::NotFound(_)) => {}
            Ok(state) => {
                return Err(RuntimeError::Command(format!(
                    "container {} still has a task in state {}",
                    self.id, state.status
                )));
            }
            Err(e) => return Err(e),
        }

        if !opts.snapshot_cleanup {
            return Ok(());
        }
        let Some(bundle) = &self.bundle else {
            return Ok(());
        };

        remove_path(&pid_file(bundle), false).await?;
        if self.runtime.remove_bundle {
            info!("Youki: Removing bundle {}", bundle.display());
            remove_path(bundle, true).await?;
        }
        Ok(())
    }
}
