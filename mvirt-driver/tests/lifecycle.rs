//! End-to-end lifecycle tests against an in-memory runtime.
//!
//! Run with: cargo test -p mvirt-driver --test lifecycle

mod common;

use common::{Call, FakeRuntime, redis_handle};
use mvirt_driver::{
    CONTAINER_NAME_ATTR, ExitMonitor, HandleConfig, StartGate, TaskState,
};
use nix::sys::signal::Signal;
use std::time::Duration;
use tokio::time::Instant;

fn assert_exit_invariant(status: &mvirt_driver::TaskStatus) {
    if status.state == TaskState::Exited {
        assert!(status.exit_result.is_some());
        assert!(status.completed_at.is_some());
    }
}

/// Test: run starts the task once, after the grace period, without
/// changing the handle's state.
#[tokio::test(start_paused = true)]
async fn test_run_starts_once_after_grace() {
    let fake = FakeRuntime::new();
    let handle = redis_handle(&fake, HandleConfig::default());

    let before = Instant::now();
    handle.run().await.expect("run failed");

    let starts = fake.call_times(&Call::Start);
    assert_eq!(starts.len(), 1);
    assert!(starts[0] - before >= Duration::from_secs(5));

    let status = handle.task_status();
    assert_eq!(status.id, "task-1");
    assert_eq!(status.name, "redis");
    assert_eq!(status.state, TaskState::Pending);
    assert_exit_invariant(&status);
}

/// Test: Full lifecycle - monitor, run, graceful stop, cleanup.
#[tokio::test(start_paused = true)]
async fn test_graceful_lifecycle() {
    let fake = FakeRuntime::new();
    fake.exit_on_signal(true);
    let handle = redis_handle(
        &fake,
        HandleConfig {
            start_gate: StartGate::MonitorReady { timeout_secs: 1 },
            ..HandleConfig::default()
        },
    );

    let monitor = ExitMonitor::attach(handle.clone())
        .await
        .expect("attach failed");
    handle.run().await.expect("run failed");
    handle.mark_running();
    assert!(handle.is_running());

    handle
        .shutdown(Duration::from_secs(5), Signal::SIGTERM)
        .await
        .expect("shutdown failed");
    monitor.join().await;

    assert_eq!(fake.kills(), vec![Signal::SIGTERM]);
    let status = handle.task_status();
    assert_eq!(status.state, TaskState::Exited);
    assert_eq!(status.exit_result.as_ref().map(|r| r.signal), Some(15));
    assert_exit_invariant(&status);

    handle.cleanup().await.expect("cleanup failed");
    assert_eq!(
        fake.calls(),
        vec![
            Call::Wait,
            Call::Start,
            Call::Kill(Signal::SIGTERM),
            Call::Status,
            Call::DeleteTask,
            Call::DeleteContainer,
        ]
    );
}

/// Test: a task ignoring SIGTERM is killed after the full grace period.
#[tokio::test(start_paused = true)]
async fn test_stubborn_task_is_killed() {
    let fake = FakeRuntime::new();
    let handle = redis_handle(&fake, HandleConfig::default());

    let monitor = ExitMonitor::attach(handle.clone())
        .await
        .expect("attach failed");
    handle.run().await.expect("run failed");
    handle.mark_running();

    let before = Instant::now();
    handle
        .shutdown(Duration::from_secs(5), Signal::SIGTERM)
        .await
        .expect("shutdown failed");

    assert_eq!(fake.kills(), vec![Signal::SIGTERM, Signal::SIGKILL]);
    let sigkill_at = fake.call_times(&Call::Kill(Signal::SIGKILL));
    assert!(sigkill_at[0] - before >= Duration::from_secs(5));

    monitor.join().await;
    let status = handle.task_status();
    assert_eq!(status.state, TaskState::Exited);
    assert_eq!(status.exit_result.map(|r| r.exit_code), Some(137));
}

/// Test: status snapshots stay readable while shutdown waits.
#[tokio::test(start_paused = true)]
async fn test_status_during_shutdown() {
    let fake = FakeRuntime::new();
    let handle = redis_handle(&fake, HandleConfig::default());
    handle.run().await.expect("run failed");
    handle.mark_running();

    let stopper = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .shutdown(Duration::from_secs(10), Signal::SIGTERM)
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = handle.task_status();
    assert_eq!(status.state, TaskState::Running);
    assert_eq!(
        status
            .driver_attributes
            .get(CONTAINER_NAME_ATTR)
            .map(String::as_str),
        Some("redis-container")
    );
    assert!(handle.is_running());

    stopper.await.unwrap().expect("shutdown failed");
}

/// Test: cleanup while the task still runs leaves the container alone,
/// and succeeds once the task has stopped.
#[tokio::test(start_paused = true)]
async fn test_cleanup_retry_after_failed_task_delete() {
    let fake = FakeRuntime::new();
    let handle = redis_handle(&fake, HandleConfig::default());
    handle.run().await.expect("run failed");

    let err = handle.cleanup().await.expect_err("cleanup should fail");
    assert_eq!(err.phase(), Some(mvirt_driver::Phase::DeleteTask));
    assert!(!fake.calls().contains(&Call::DeleteContainer));

    fake.exit(0, 0);
    handle.cleanup().await.expect("cleanup retry failed");
    assert_eq!(fake.call_times(&Call::DeleteContainer).len(), 1);
}

/// Test: a second signal to an already-exited task is benign.
#[tokio::test(start_paused = true)]
async fn test_repeated_shutdown_after_exit() {
    let fake = FakeRuntime::new();
    fake.exit_on_signal(true);
    let handle = redis_handle(&fake, HandleConfig::default());
    handle.run().await.expect("run failed");

    handle
        .shutdown(Duration::from_secs(1), Signal::SIGTERM)
        .await
        .expect("first shutdown failed");
    handle
        .shutdown(Duration::from_secs(1), Signal::SIGTERM)
        .await
        .expect("second shutdown failed");

    assert_eq!(fake.kills(), vec![Signal::SIGTERM, Signal::SIGTERM]);
}

/// Test: signals outside the runtime's model never reach the runtime.
#[tokio::test]
async fn test_signal_validation() {
    let fake = FakeRuntime::new();
    let handle = redis_handle(&fake, HandleConfig::default());

    assert!(handle.signal(-1).await.is_err());
    assert!(fake.calls().is_empty());

    handle
        .signal(Signal::SIGUSR1 as i32)
        .await
        .expect("signal failed");
    assert_eq!(fake.kills(), vec![Signal::SIGUSR1]);
}
