// ABOUTME: Coordinator-side message link to one worker process.
// ABOUTME: A pump task owns the channel halves and reports messages, errors, and exit.

use futures::future::BoxFuture;
use liege_core::{ExitStatus, Message, WorkerId};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Forcefully terminates the process behind a link.
pub type Killer = Box<dyn FnMut() + Send>;

/// Something the worker side did, as observed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A valid protocol message arrived.
    Message(Message),
    /// Asynchronous, non-fatal channel trouble.
    Diagnostic(String),
    /// The process is gone. Always the last event on a link.
    Exited(ExitStatus),
}

/// Requests from the coordinator to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    Deliver(Message),
    Kill,
}

/// A freshly spawned worker: its identity, outbound commands, inbound events.
pub struct WorkerLink {
    pub id: WorkerId,
    pub commands: mpsc::UnboundedSender<LinkCommand>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl std::fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLink").field("id", &self.id).finish()
    }
}

/// Wire a worker's channel halves and exit notification into a `WorkerLink`.
///
/// `reader` carries lines from the worker, `writer` carries lines to it, and
/// `exit` resolves once the process has terminated. Must be called from
/// within a tokio runtime.
pub fn attach<R, W>(
    id: WorkerId,
    reader: R,
    writer: W,
    exit: BoxFuture<'static, ExitStatus>,
    kill: Killer,
) -> WorkerLink
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    tokio::spawn(pump(id, reader, writer, exit, kill, commands_rx, events_tx));

    WorkerLink {
        id,
        commands: commands_tx,
        events: events_rx,
    }
}

async fn pump<R, W>(
    id: WorkerId,
    reader: R,
    mut writer: W,
    mut exit: BoxFuture<'static, ExitStatus>,
    mut kill: Killer,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    let mut reading = true;
    let mut commands_open = true;

    loop {
        tokio::select! {
            status = &mut exit => {
                let _ = events.send(WorkerEvent::Exited(status));
                break;
            }
            command = commands.recv(), if commands_open => match command {
                Some(LinkCommand::Deliver(message)) => {
                    if let Err(e) = deliver(&mut writer, message).await {
                        let _ = events.send(WorkerEvent::Diagnostic(format!(
                            "failed to deliver {} message: {}",
                            message, e
                        )));
                    }
                }
                Some(LinkCommand::Kill) => {
                    tracing::debug!(worker = %id, "Killing worker");
                    kill();
                }
                None => commands_open = false,
            },
            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Message::from_line(&line) {
                    Ok(message) => {
                        let _ = events.send(WorkerEvent::Message(message));
                    }
                    Err(e) => {
                        tracing::warn!(worker = %id, error = %e, line = %line, "Ignoring invalid message");
                    }
                },
                Ok(None) => reading = false,
                Err(e) => {
                    reading = false;
                    let _ = events.send(WorkerEvent::Diagnostic(format!(
                        "failed to read from worker: {}",
                        e
                    )));
                }
            },
        }
    }
}

async fn deliver<W>(writer: &mut W, message: Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.to_line().map_err(std::io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
