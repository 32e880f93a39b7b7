//! mvirt-driver - supervises one youki container task.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use mvirt_driver::utils::signals;
use mvirt_driver::{Config, ExitMonitor, HandleConfig, TaskConfig, TaskHandle, YoukiRuntime};
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

/// How long to wait for a killed task to be reaped before tearing it down.
const TEARDOWN_WAIT: Duration = Duration::from_secs(5);

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Task driver for youki containers.
#[derive(Parser)]
#[command(name = "mvirt-driver")]
#[command(version = VERSION)]
#[command(about = "Supervise a single youki container task")]
struct Args {
    /// Path to youki binary
    #[arg(long, global = true)]
    youki: Option<PathBuf>,

    /// Root directory for youki container state
    #[arg(long, global = true)]
    youki_root: Option<PathBuf>,

    /// Remove the bundle directory during cleanup
    #[arg(long, global = true)]
    remove_bundle: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, start and supervise a container until it exits or Ctrl-C
    Run {
        /// Task identifier
        #[arg(long)]
        id: String,
        /// Task name
        #[arg(long)]
        name: String,
        /// OCI bundle directory
        #[arg(long)]
        bundle: PathBuf,
        /// Handle settings (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Forward a signal to a running container task
    Kill {
        /// Container identifier
        #[arg(long)]
        id: String,
        /// Signal name or number
        signal: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    // Exit watchers block in waitpid; shutting down in the background keeps
    // an error exit from waiting on a container that is still alive.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(async_main(args));
    rt.shutdown_background();
    result
}

async fn async_main(args: Args) -> Result<()> {
    let mut config = Config::default();
    if let Some(youki_path) = args.youki {
        info!("Using custom youki path: {}", youki_path.display());
        config.youki_path = youki_path;
    }
    config.youki_root = args.youki_root;
    config.remove_bundle = args.remove_bundle;
    let runtime = YoukiRuntime::new(&config);

    match args.command {
        Commands::Run {
            id,
            name,
            bundle,
            config,
        } => {
            let settings = match config {
                Some(path) => HandleConfig::from_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => HandleConfig::default(),
            };
            run(runtime, TaskConfig::new(id, name), bundle, settings).await
        }
        Commands::Kill { id, signal } => kill(runtime, &id, &signal).await,
    }
}

async fn run(
    runtime: YoukiRuntime,
    task_config: TaskConfig,
    bundle: PathBuf,
    settings: HandleConfig,
) -> Result<()> {
    info!("mvirt-driver v{} starting task {}", VERSION, task_config.id);

    // Container processes get reparented to us so we can reap them
    signals::set_child_subreaper()
        .map_err(|e| anyhow!("Failed to set as child subreaper: {}", e))?;

    let kill_signal = signals::parse_signal(&settings.kill_signal)
        .ok_or_else(|| anyhow!("Unknown kill signal {}", settings.kill_signal))?;
    let shutdown_timeout = settings.shutdown_timeout();

    // Registered up front so an interrupt during the start gate is ours to handle.
    let mut interrupt = signal(SignalKind::interrupt())?;

    let (container, task) = runtime.create(&task_config.id, &bundle).await?;
    let container_name = task_config.name.clone();
    let handle = Arc::new(TaskHandle::new(
        task_config,
        container_name,
        Arc::new(container),
        Arc::new(task),
        settings,
    ));

    let monitor = match ExitMonitor::attach(Arc::clone(&handle)).await {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Failed to watch task {}: {}", handle.id(), e);
            teardown(&handle).await;
            return Err(e.into());
        }
    };

    let started = tokio::select! {
        result = handle.run() => result.map_err(anyhow::Error::from),
        _ = interrupt.recv() => Err(anyhow!("interrupted before task {} started", handle.id())),
    };
    if let Err(e) = started {
        error!("Task {} did not start: {}", handle.id(), e);
        teardown(&handle).await;
        return Err(e);
    }
    handle.mark_running();
    info!("Task {} running", handle.id());

    tokio::select! {
        _ = handle.exited() => {}
        _ = interrupt.recv() => {
            info!("Interrupt received, stopping task {}", handle.id());
            if let Err(e) = handle.shutdown(shutdown_timeout, kill_signal).await {
                // Leave the container in place so it can be inspected or retried.
                error!("Shutdown of task {} failed: {}", handle.id(), e);
                monitor.abort();
                return Err(e.into());
            }
        }
    }

    if handle.task_status().exit_result.is_none() {
        if monitor.is_finished() {
            warn!("Exit monitor finished without recording an exit");
        } else {
            monitor.join().await;
        }
    }

    handle.cleanup().await?;

    let status = handle.task_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Kill a task that never got going and remove its container.
async fn teardown(handle: &TaskHandle) {
    if let Err(e) = handle.signal(Signal::SIGKILL as i32).await {
        warn!("Failed to kill task {}: {}", handle.id(), e);
    }
    if tokio::time::timeout(TEARDOWN_WAIT, handle.exited())
        .await
        .is_err()
    {
        warn!("Task {} not reaped after {:?}", handle.id(), TEARDOWN_WAIT);
    }
    if let Err(e) = handle.cleanup().await {
        error!("Cleanup of task {} failed: {}", handle.id(), e);
    }
}

async fn kill(runtime: YoukiRuntime, id: &str, signal: &str) -> Result<()> {
    let signal =
        signals::parse_signal(signal).ok_or_else(|| anyhow!("Unknown signal {}", signal))?;
    let (container, task) = runtime.open(id, None, None);
    let handle = TaskHandle::new(
        TaskConfig::new(id, id),
        id,
        Arc::new(container),
        Arc::new(task),
        HandleConfig::default(),
    );

    handle.signal(signal as i32).await?;
    info!("Sent {} to {}", signal, id);
    Ok(())
}
