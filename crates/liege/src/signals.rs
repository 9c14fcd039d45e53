// ABOUTME: Bridges OS signals into supervisor and agent actions.
// ABOUTME: Reload signal for the coordinator plus interrupt/terminate handling.

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

fn kind(sig: Signal) -> SignalKind {
    SignalKind::from_raw(sig as i32)
}

/// Call `on_reload` every time `sig` is delivered to this process.
///
/// The handler is installed before this returns, so a signal sent right
/// after is not lost.
pub fn spawn_reload_listener<F>(sig: Signal, on_reload: F) -> std::io::Result<JoinHandle<()>>
where
    F: Fn() + Send + 'static,
{
    let mut stream = signal(kind(sig))?;

    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            tracing::info!(signal = %sig, "Received reload signal. Reloading...");
            on_reload();
        }
    }))
}

/// SIGINT and SIGTERM, taken over from their default disposition.
///
/// Workers log and ignore them; the coordinator treats them as a request to
/// shut the pool down.
pub struct Interrupts {
    streams: Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)>,
}

impl Interrupts {
    /// Take over SIGINT and SIGTERM for this process.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            streams: Some((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            )),
        })
    }

    /// Never yields; leaves the process's signal dispositions alone.
    pub fn disabled() -> Self {
        Self { streams: None }
    }

    /// Wait for the next interrupt or terminate, returning its name.
    pub async fn recv(&mut self) -> &'static str {
        match &mut self.streams {
            Some((interrupt, terminate)) => tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                else => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }
}
