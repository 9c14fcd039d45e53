// ABOUTME: Control loop that serializes lifecycle operations onto one task.
// ABOUTME: SupervisorHandle sends commands; reload requests are coalesced.

use super::{ReloadReport, ShutdownReport, Supervisor, WorkerStatus};
use crate::error::SupervisorError;
use crate::spawn::Spawner;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

/// Commands sent to the control loop
pub(crate) enum Command {
    Start {
        workers: usize,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
    Reload {
        reply: oneshot::Sender<ReloadReport>,
    },
    Status {
        reply: oneshot::Sender<Vec<WorkerStatus>>,
    },
}

/// Cloneable handle to a launched supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    reload: Arc<Notify>,
}

impl SupervisorHandle {
    pub async fn start(&self, workers: usize) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { workers, reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    pub async fn shutdown(&self) -> Result<ShutdownReport, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    pub async fn reload(&self) -> Result<ReloadReport, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reload { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    pub async fn status(&self) -> Result<Vec<WorkerStatus>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Ask for a reload without waiting for it.
    ///
    /// Requests made while a reload is running collapse into a single
    /// pending one.
    pub fn request_reload(&self) {
        self.reload.notify_one();
    }

    async fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl<S: Spawner + 'static> Supervisor<S> {
    /// Move the supervisor onto its own task.
    ///
    /// The loop exits once every handle has been dropped.
    pub fn launch(self) -> (SupervisorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let reload = Arc::new(Notify::new());
        let handle = SupervisorHandle {
            commands: commands_tx,
            reload: reload.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx, reload));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, reload: Arc<Notify>) {
        loop {
            tokio::select! {
                biased;
                _ = reload.notified() => {
                    tracing::info!("Reload requested");
                    self.reload().await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                Some((id, event)) = self.events.next(), if !self.events.is_empty() => {
                    self.observe(id, event);
                }
            }
        }

        tracing::debug!(workers = self.registry.len(), "Supervisor control loop stopped");
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Start { workers, reply } => {
                let _ = reply.send(self.start(workers).await);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.shutdown().await);
            }
            Command::Reload { reply } => {
                let _ = reply.send(self.reload().await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.workers());
            }
        }
    }
}
