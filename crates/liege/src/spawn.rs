// ABOUTME: Spawns worker child processes and wires up their message channels.
// ABOUTME: Defines the Spawner seam and the tokio::process implementation.

use crate::error::SpawnError;
use crate::link::{self, WorkerLink};
use async_trait::async_trait;
use futures::FutureExt;
use liege_core::{ExitStatus, WorkerId};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

/// Creates worker processes.
///
/// The returned link delivers messages to the new worker, reports the
/// messages it sends back, and ends with its exit status.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self) -> Result<WorkerLink, SpawnError>;
}

/// Spawns workers as OS child processes.
///
/// The child's stdin and stdout carry the message channel; its stderr is
/// forwarded to ours with the worker's pid as prefix.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary with `args` (e.g. `worker --config ...`).
    pub fn current_exe(args: Vec<OsString>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self) -> Result<WorkerLink, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let id = WorkerId(child.id().ok_or(SpawnError::MissingPid)?);
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(id, stderr));
        }

        tracing::debug!(worker = %id, program = %self.program.display(), "Spawned worker");

        let exit = async move {
            match child.wait().await {
                Ok(status) => ExitStatus::from(status),
                Err(e) => {
                    tracing::warn!(worker = %id, error = %e, "Failed to wait for worker");
                    ExitStatus::Unknown
                }
            }
        }
        .boxed();

        let pid = Pid::from_raw(id.0 as i32);
        let killer = Box::new(move || {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                tracing::warn!(worker = %id, error = %e, "Failed to kill worker");
            }
        });

        Ok(link::attach(id, stdout, stdin, exit, killer))
    }
}

async fn forward_stderr(id: WorkerId, stderr: ChildStderr) {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("[{}] {}", id, line);
    }
}
