// ABOUTME: Error types for the liege supervisor.
// ABOUTME: Provides SpawnError, SupervisorError, and per-worker WorkerFailure.

use liege_core::{ExitStatus, WorkerId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while creating a worker process.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to start the process.
    #[error("failed to spawn worker process: {0}")]
    Io(#[from] std::io::Error),

    /// A channel pipe was not captured.
    #[error("worker {0} pipe was not captured")]
    MissingPipe(&'static str),

    /// The child exited before its identity could be read.
    #[error("worker process has no pid")]
    MissingPid,
}

/// Errors from coordinator lifecycle operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Spawning a worker failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The worker exited before sending its ready message.
    #[error("worker {id} exited with {status} before becoming ready")]
    StartupFailed { id: WorkerId, status: ExitStatus },

    /// The worker did not send its ready message in time.
    #[error("worker {id} not ready after {timeout:?}")]
    ReadyTimeout { id: WorkerId, timeout: Duration },

    /// The PID file could not be written.
    #[error("failed to write PID file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The control loop is no longer running.
    #[error("supervisor is not running")]
    Stopped,
}

/// A single worker's failure inside a multi-worker sequence.
///
/// These are reported, never propagated: the sequence carries on.
#[derive(Error, Debug)]
pub enum WorkerFailure {
    /// The worker's exit status was non-zero after a shutdown message.
    #[error("worker {id} shut down with {status}")]
    ShutdownFailed { id: WorkerId, status: ExitStatus },

    /// The worker did not exit in time and was killed.
    #[error("worker {id} did not exit within {timeout:?}")]
    ExitTimeout { id: WorkerId, timeout: Duration },

    /// The replacement for a worker could not be started.
    #[error("replacement for worker {id} failed: {source}")]
    Replacement {
        id: WorkerId,
        #[source]
        source: SupervisorError,
    },
}

impl WorkerFailure {
    /// The worker this failure concerns.
    pub fn id(&self) -> WorkerId {
        match self {
            WorkerFailure::ShutdownFailed { id, .. }
            | WorkerFailure::ExitTimeout { id, .. }
            | WorkerFailure::Replacement { id, .. } => *id,
        }
    }
}
