// ABOUTME: liege library with supervisor, agent, spawner, and signal modules.
// ABOUTME: Entry points for running the coordinator and a worker process.

pub mod agent;
pub mod error;
pub mod link;
pub mod pidfile;
pub mod signals;
pub mod spawn;
pub mod supervisor;

pub use agent::{Agent, AgentExit, AgentOptions, AgentState, CommandInstance, Instance};
pub use error::{SpawnError, SupervisorError, WorkerFailure};
pub use liege_core::{Config, ExitStatus, Message, WorkerCommand, WorkerId};
pub use link::{WorkerEvent, WorkerLink};
pub use spawn::{ProcessSpawner, Spawner};
pub use supervisor::{
    ReloadReport, ShutdownReport, Supervisor, SupervisorHandle, SupervisorOptions, WorkerState,
    WorkerStatus,
};

use anyhow::{Context, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::PathBuf;

/// Options for running the coordinator
pub struct SupervisorRunOptions {
    /// Path to configuration file
    pub config_path: PathBuf,
    /// Overrides the configured pool size
    pub workers: Option<usize>,
}

/// Options for running a worker (internal, spawned by the coordinator)
pub struct WorkerRunOptions {
    /// Path to configuration file
    pub config_path: PathBuf,
}

/// Resolve an optional `--config` flag to a concrete path
pub fn config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}

fn init_logging(config: &Config) {
    match config.log_file_expanded() {
        Some(path) => liege_log::init_file(&path),
        None => liege_log::init(),
    }
}

/// Run the coordinator until SIGINT/SIGTERM, then shut the pool down.
pub async fn run_supervisor(options: SupervisorRunOptions) -> Result<()> {
    let config = Config::load(&options.config_path)?;
    init_logging(&config);

    let workers = options.workers.unwrap_or(config.workers);
    let reload_signal = config.reload_signal()?;
    let pid_file = config.pid_file_expanded();

    let spawner = ProcessSpawner::current_exe(vec![
        "worker".into(),
        "--config".into(),
        options.config_path.clone().into_os_string(),
    ])
    .context("Failed to locate the liege executable")?;

    let mut interrupts =
        signals::Interrupts::install().context("Failed to install shutdown signal handlers")?;

    let supervisor = Supervisor::new(spawner, SupervisorOptions::from(&config));
    let (handle, task) = supervisor.launch();

    let reload_handle = handle.clone();
    let listener = signals::spawn_reload_listener(reload_signal, move || {
        reload_handle.request_reload();
    })
    .context("Failed to install reload signal handler")?;

    if let Err(e) = handle.start(workers).await {
        tracing::error!(error = %e, "Cluster did not fully start");
    }

    let received = interrupts.recv().await;
    tracing::info!(signal = received, "Received shutdown signal. Stopping workers...");

    listener.abort();
    let report = handle.shutdown().await?;
    for failure in &report.failures {
        tracing::warn!(error = %failure, "Worker did not shut down cleanly");
    }
    tracing::info!(
        stopped = report.stopped.len(),
        failed = report.failures.len(),
        "Cluster stopped"
    );

    if let Some(path) = pid_file {
        pidfile::remove_pid_file(&path)
            .with_context(|| format!("Failed to remove PID file {}", path.display()))?;
    }

    drop(handle);
    let _ = task.await;
    Ok(())
}

/// Run a worker's agent around the configured command. Returns the exit code.
pub async fn run_worker(options: WorkerRunOptions) -> Result<i32> {
    let config = Config::load(&options.config_path)?;
    init_logging(&config);

    let instance = CommandInstance::new(config.worker.clone());
    let mut agent = Agent::new(
        instance,
        AgentOptions {
            orphan_poll: config.orphan_poll(),
            handle_signals: true,
        },
    );

    Ok(agent.run_stdio().await.code())
}

/// Send the configured reload signal to the coordinator named in the PID file.
pub fn send_reload(config_path: &std::path::Path) -> Result<i32> {
    let config = Config::load(config_path)?;
    let path = config
        .pid_file_expanded()
        .context("No pid_file configured; cannot find the running coordinator")?;
    let pid = pidfile::read_pid_file(&path)
        .with_context(|| format!("Failed to read PID file {}", path.display()))?
        .with_context(|| format!("PID file {} does not exist", path.display()))?;
    let signal = config.reload_signal()?;

    kill(Pid::from_raw(pid), signal)
        .with_context(|| format!("Failed to send {} to process {}", signal, pid))?;
    Ok(pid)
}

/// Write a starter configuration file.
pub fn run_init(path: &std::path::Path, worker: WorkerCommand, workers: usize) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {}", path.display());
    }

    let mut config = Config::new(worker);
    config.workers = workers;
    config.validate()?;
    config.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
