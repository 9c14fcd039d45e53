// ABOUTME: Coordinator that owns the worker registry and drives pool-wide transitions.
// ABOUTME: start, shutdown, and rolling reload are sequences of per-worker handshakes.

mod control;
mod handle;

pub use control::SupervisorHandle;
pub use handle::{Registry, WorkerHandle, WorkerState, WorkerStatus};

use crate::error::{SupervisorError, WorkerFailure};
use crate::link::WorkerEvent;
use crate::pidfile;
use crate::spawn::Spawner;
use liege_core::{Config, ExitStatus, Message, WorkerId};
use std::path::PathBuf;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};

/// How long a killed worker gets to report its exit before it is dropped anyway.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Bound on the ready handshake of each spawned worker
    pub ready_timeout: Duration,
    /// Bound on the exit wait after a shutdown message
    pub exit_timeout: Duration,
    /// Written with our pid once `start` has filled the pool
    pub pid_file: Option<PathBuf>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            exit_timeout: Duration::from_secs(30),
            pid_file: None,
        }
    }
}

impl From<&Config> for SupervisorOptions {
    fn from(config: &Config) -> Self {
        Self {
            ready_timeout: config.ready_timeout(),
            exit_timeout: config.exit_timeout(),
            pid_file: config.pid_file_expanded(),
        }
    }
}

/// Outcome of `Supervisor::shutdown`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Workers that exited with status 0, in shutdown order
    pub stopped: Vec<WorkerId>,
    pub failures: Vec<WorkerFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of `Supervisor::reload`.
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// (old, new) identity pairs, in reload order
    pub replaced: Vec<(WorkerId, WorkerId)>,
    pub failures: Vec<WorkerFailure>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the pool of workers.
///
/// Every lifecycle operation takes `&mut self`, so two of them can never walk
/// the registry at once. `launch` moves the supervisor onto its own task and
/// serializes callers (and reload signals) through a command queue.
pub struct Supervisor<S> {
    spawner: S,
    options: SupervisorOptions,
    registry: Registry,
    events: StreamMap<WorkerId, UnboundedReceiverStream<WorkerEvent>>,
}

impl<S: Spawner> Supervisor<S> {
    pub fn new(spawner: S, options: SupervisorOptions) -> Self {
        Self {
            spawner,
            options,
            registry: Registry::new(),
            events: StreamMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Registered workers in insertion order.
    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.registry.statuses()
    }

    /// Spawn `workers` workers one at a time, each only after the previous
    /// one is ready, then write the PID file if one is configured.
    ///
    /// Stops at the first worker that fails to become ready; the workers
    /// already started stay registered.
    pub async fn start(&mut self, workers: usize) -> Result<(), SupervisorError> {
        tracing::info!(
            pid = std::process::id(),
            workers = workers,
            "Starting cluster"
        );

        for _ in 0..workers {
            self.start_worker().await?;
        }

        if let Some(path) = &self.options.pid_file {
            pidfile::write_pid_file(path).map_err(|source| SupervisorError::PidFile {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "Wrote PID file");
        }

        tracing::info!(workers = self.registry.len(), "All workers ready");
        Ok(())
    }

    /// Shut down every worker registered at call time, in insertion order,
    /// waiting for each to exit before moving to the next.
    ///
    /// A worker that exits non-zero or has to be killed is recorded in the
    /// report and removed; the remaining workers are still shut down.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for id in self.registry.snapshot() {
            if !self.registry.contains(id) {
                tracing::debug!(worker = %id, "Worker already exited, skipping");
                continue;
            }

            tracing::info!(worker = %id, "Sending graceful shutdown to worker");
            match self.shutdown_worker(id).await {
                Ok(()) => report.stopped.push(id),
                Err(failure) => {
                    tracing::error!(error = %failure, "Worker shutdown failed");
                    report.failures.push(failure);
                }
            }
        }

        report
    }

    /// Replace each worker registered at call time with a fresh one:
    /// shut it down, then spawn and await a replacement, before moving on.
    ///
    /// Replacements are not part of the snapshot and are not reloaded again.
    pub async fn reload(&mut self) -> ReloadReport {
        let mut report = ReloadReport::default();
        let snapshot = self.registry.snapshot();

        tracing::info!(workers = snapshot.len(), "Reloading workers");

        for id in snapshot {
            if !self.registry.contains(id) {
                tracing::debug!(worker = %id, "Worker exited before its reload, skipping");
                continue;
            }

            tracing::info!(worker = %id, "Reloading worker");
            if let Err(failure) = self.shutdown_worker(id).await {
                tracing::error!(error = %failure, "Worker shutdown failed during reload");
                report.failures.push(failure);
            }

            match self.start_worker().await {
                Ok(replacement) => report.replaced.push((id, replacement)),
                Err(source) => {
                    let failure = WorkerFailure::Replacement { id, source };
                    tracing::error!(error = %failure, "Worker replacement failed");
                    report.failures.push(failure);
                }
            }
        }

        tracing::info!(
            replaced = report.replaced.len(),
            failures = report.failures.len(),
            "Reload complete"
        );
        report
    }

    async fn start_worker(&mut self) -> Result<WorkerId, SupervisorError> {
        let link = self.spawner.spawn().await?;
        let id = link.id;

        self.registry.insert(WorkerHandle::new(id, link.commands));
        self.events
            .insert(id, UnboundedReceiverStream::new(link.events));

        let timeout = self.options.ready_timeout;
        match tokio::time::timeout(timeout, self.await_ready(id)).await {
            Ok(Ok(())) => {
                if let Some(handle) = self.registry.get_mut(id) {
                    handle.set_state(WorkerState::Ready);
                }
                tracing::debug!(worker = %id, "Worker is ready");
                Ok(id)
            }
            Ok(Err(status)) => {
                tracing::error!(worker = %id, status = %status, "Worker exited before becoming ready");
                self.forget(id);
                Err(SupervisorError::StartupFailed { id, status })
            }
            Err(_) => {
                tracing::warn!(worker = %id, timeout = ?timeout, "Worker not ready in time, killing");
                self.evict(id).await;
                Err(SupervisorError::ReadyTimeout { id, timeout })
            }
        }
    }

    async fn shutdown_worker(&mut self, id: WorkerId) -> Result<(), WorkerFailure> {
        let Some(handle) = self.registry.get_mut(id) else {
            return Ok(());
        };

        if !handle.send(Message::Shutdown) {
            tracing::debug!(worker = %id, "Worker link closed before shutdown message");
        }
        handle.set_state(WorkerState::ShuttingDown);

        let timeout = self.options.exit_timeout;
        match tokio::time::timeout(timeout, self.await_exit(id)).await {
            Ok(status) => {
                self.forget(id);
                if status.success() {
                    tracing::info!(worker = %id, "Worker exited");
                    Ok(())
                } else {
                    Err(WorkerFailure::ShutdownFailed { id, status })
                }
            }
            Err(_) => {
                tracing::warn!(worker = %id, timeout = ?timeout, "Worker did not exit in time, killing");
                self.evict(id).await;
                Err(WorkerFailure::ExitTimeout { id, timeout })
            }
        }
    }

    /// Kill a worker and drop it from the registry once it is gone (or the
    /// grace period runs out).
    async fn evict(&mut self, id: WorkerId) {
        if let Some(handle) = self.registry.get(id) {
            handle.kill();
        }

        match tokio::time::timeout(KILL_GRACE, self.await_exit(id)).await {
            Ok(status) => tracing::debug!(worker = %id, status = %status, "Evicted worker exited"),
            Err(_) => tracing::warn!(worker = %id, "Evicted worker did not report its exit"),
        }

        self.forget(id);
    }

    async fn await_ready(&mut self, id: WorkerId) -> Result<(), ExitStatus> {
        while let Some(event) = self.next_event_for(id).await {
            match event {
                WorkerEvent::Message(Message::Ready) => return Ok(()),
                WorkerEvent::Message(other) => {
                    tracing::warn!(worker = %id, message = %other, "Unexpected message while awaiting ready");
                }
                WorkerEvent::Diagnostic(detail) => {
                    tracing::error!(worker = %id, error = %detail, "Worker encountered an error");
                }
                WorkerEvent::Exited(status) => return Err(status),
            }
        }
        Err(ExitStatus::Unknown)
    }

    async fn await_exit(&mut self, id: WorkerId) -> ExitStatus {
        while let Some(event) = self.next_event_for(id).await {
            match event {
                WorkerEvent::Exited(status) => return status,
                WorkerEvent::Message(message) => {
                    tracing::debug!(worker = %id, message = %message, "Ignoring message while awaiting exit");
                }
                WorkerEvent::Diagnostic(detail) => {
                    tracing::error!(worker = %id, error = %detail, "Worker encountered an error");
                }
            }
        }
        ExitStatus::Unknown
    }

    /// Next event from worker `id`. Events from other workers that arrive in
    /// the meantime are handled as out-of-band events. `None` once the
    /// worker's event stream is gone.
    async fn next_event_for(&mut self, id: WorkerId) -> Option<WorkerEvent> {
        loop {
            if !self.events.contains_key(&id) {
                return None;
            }
            let (from, event) = self.events.next().await?;
            if from == id {
                return Some(event);
            }
            self.observe(from, event);
        }
    }

    /// Handle an event that no handshake is waiting for.
    fn observe(&mut self, id: WorkerId, event: WorkerEvent) {
        match event {
            WorkerEvent::Message(Message::Ready) => {
                tracing::debug!(worker = %id, "Ignoring repeated ready message");
            }
            WorkerEvent::Message(Message::Shutdown) => {
                tracing::warn!(worker = %id, "Ignoring shutdown message sent by a worker");
            }
            WorkerEvent::Diagnostic(detail) => {
                tracing::error!(worker = %id, error = %detail, "Worker encountered an error");
            }
            WorkerEvent::Exited(status) => {
                match self.registry.get(id).map(WorkerHandle::state) {
                    Some(WorkerState::Spawning) | Some(WorkerState::Ready) => {
                        tracing::error!(worker = %id, status = %status, "Worker exited unexpectedly");
                    }
                    _ => tracing::info!(worker = %id, status = %status, "Worker exited"),
                }
                self.forget(id);
            }
        }
    }

    fn forget(&mut self, id: WorkerId) {
        self.events.remove(&id);
        if let Some(mut handle) = self.registry.remove(id) {
            handle.set_state(WorkerState::Exited);
            tracing::debug!(worker = %id, state = %handle.state(), remaining = self.registry.len(), "Removed worker from registry");
        }
    }
}
