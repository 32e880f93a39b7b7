//! Signal and child-process helpers.

use crate::services::runtime::ExitInfo;
use chrono::Utc;
use log::{debug, error, warn};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::str::FromStr;

/// Become a child subreaper so orphaned container processes are reparented
/// to us and can be reaped with `waitpid`.
pub fn set_child_subreaper() -> nix::Result<()> {
    nix::sys::prctl::set_child_subreaper(true)
}

/// Parse a signal name such as `SIGTERM`, `TERM` or `15`.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let name = name.trim();
    if let Ok(num) = name.parse::<i32>() {
        return Signal::try_from(num).ok();
    }
    let upper = name.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        Signal::from_str(&upper).ok()
    } else {
        Signal::from_str(&format!("SIG{upper}")).ok()
    }
}

/// Wait for a specific child process to exit.
/// This is a blocking call and should be spawned in a separate task.
pub fn wait_for_child(pid: i32) -> ExitInfo {
    let pid_obj = Pid::from_raw(pid);
    let status = waitpid(pid_obj, None);

    let (exit_code, signal) = match status {
        Ok(WaitStatus::Exited(_, code)) => {
            debug!("Child {} exited with status {}", pid, code);
            (code, 0)
        }
        Ok(WaitStatus::Signaled(_, sig, _)) => {
            debug!("Child {} killed by signal {:?}", pid, sig);
            (128 + (sig as i32), sig as i32)
        }
        Ok(other) => {
            warn!("Child {} ended with unexpected status: {:?}", pid, other);
            (255, 0)
        }
        Err(e) => {
            error!("waitpid failed for {}: {}", pid, e);
            (255, 0)
        }
    };

    ExitInfo {
        exit_code,
        signal,
        exited_at: Utc::now(),
    }
}
