// ABOUTME: Worker-side agent that wraps a startable/stoppable unit in the protocol.
// ABOUTME: Sends ready after start, stops on shutdown, orphaning, or a closed channel.

mod command;
mod orphan;

pub use command::CommandInstance;
pub use orphan::{is_orphaned, OsParent, ParentProbe, INIT_PID};

use crate::signals::Interrupts;
use async_trait::async_trait;
use liege_core::Message;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// The unit of work a worker process runs.
#[async_trait]
pub trait Instance: Send {
    async fn start(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// The worker's view of itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    NotStarted,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// How the agent finished. Maps onto the worker's process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Stopped,
    Failed,
}

impl AgentExit {
    pub fn code(&self) -> i32 {
        match self {
            AgentExit::Stopped => 0,
            AgentExit::Failed => 1,
        }
    }
}

/// Why the agent left its running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Shutdown,
    Orphaned,
    ChannelClosed,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Shutdown => f.write_str("shutdown message"),
            StopCause::Orphaned => f.write_str("coordinator exited"),
            StopCause::ChannelClosed => f.write_str("channel closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Interval between parent-process checks
    pub orphan_poll: Duration,
    /// Install SIGINT/SIGTERM handlers that log and ignore
    pub handle_signals: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            orphan_poll: Duration::from_secs(1),
            handle_signals: true,
        }
    }
}

pub struct Agent<I> {
    instance: I,
    options: AgentOptions,
    probe: Box<dyn ParentProbe>,
    state: AgentState,
}

impl<I: Instance> Agent<I> {
    pub fn new(instance: I, options: AgentOptions) -> Self {
        Self {
            instance,
            options,
            probe: Box::new(OsParent),
            state: AgentState::NotStarted,
        }
    }

    /// Replace the OS parent lookup used for orphan detection.
    pub fn with_parent_probe(mut self, probe: impl ParentProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// Run over this process's stdin (from the coordinator) and stdout (to it).
    pub async fn run_stdio(&mut self) -> AgentExit {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Run the full worker lifecycle over the given channel halves.
    ///
    /// Returns once the unit has been stopped (or failed to start); the
    /// caller exits the process with `AgentExit::code`.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> AgentExit
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let original_parent = self.probe.parent_pid();
        let mut interrupts = self.interrupts();

        self.state = AgentState::Starting;
        tracing::debug!(pid = std::process::id(), parent = original_parent, "Starting worker");

        let mut poll = orphan_poll(self.options.orphan_poll);

        match self
            .start_unless_orphaned(original_parent, &mut poll, &mut interrupts)
            .await
        {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::error!(error = %format!("{:#}", e), "Unable to start worker process. Exit worker with error");
                self.state = AgentState::Failed;
                return AgentExit::Failed;
            }
            None => {
                tracing::debug!(cause = %StopCause::Orphaned, "Abandoning startup");
                return self.stop().await;
            }
        }

        self.state = AgentState::Ready;
        if let Err(e) = send(&mut writer, Message::Ready).await {
            tracing::error!(error = %e, "Unable to report readiness to the coordinator");
            let _ = self.stop().await;
            self.state = AgentState::Failed;
            return AgentExit::Failed;
        }
        self.state = AgentState::Running;
        tracing::info!(pid = std::process::id(), "Worker is running");

        let cause = self
            .wait_for_stop(reader, original_parent, &mut poll, &mut interrupts)
            .await;
        tracing::debug!(cause = %cause, "Stopping worker");

        self.stop().await
    }

    fn interrupts(&self) -> Interrupts {
        if !self.options.handle_signals {
            return Interrupts::disabled();
        }
        Interrupts::install().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to install signal handlers");
            Interrupts::disabled()
        })
    }

    /// Start the unit while watching the parent. `None` if the coordinator
    /// went away first; the pending start is dropped.
    async fn start_unless_orphaned(
        &mut self,
        original_parent: u32,
        poll: &mut Interval,
        interrupts: &mut Interrupts,
    ) -> Option<anyhow::Result<()>> {
        let probe = &self.probe;
        let mut start = self.instance.start();

        loop {
            tokio::select! {
                result = &mut start => return Some(result),
                _ = poll.tick() => {
                    let current = probe.parent_pid();
                    if is_orphaned(original_parent, current) {
                        tracing::warn!(parent = current, "Coordinator process exited during startup. Shutting down...");
                        return None;
                    }
                }
                name = interrupts.recv() => {
                    tracing::debug!(signal = name, "Signal received during startup, ignoring");
                }
            }
        }
    }

    async fn wait_for_stop<R>(
        &mut self,
        reader: R,
        original_parent: u32,
        poll: &mut Interval,
        interrupts: &mut Interrupts,
    ) -> StopCause
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match Message::from_line(&line) {
                        Ok(Message::Shutdown) => {
                            tracing::debug!("Received shutdown message from coordinator, stopping...");
                            return StopCause::Shutdown;
                        }
                        Ok(Message::Ready) => {
                            tracing::warn!("Ignoring ready message from coordinator");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, line = %line, "Ignoring invalid message");
                        }
                    },
                    Ok(None) => {
                        tracing::warn!("Coordinator channel closed. Shutting down...");
                        return StopCause::ChannelClosed;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Coordinator channel failed. Shutting down...");
                        return StopCause::ChannelClosed;
                    }
                },
                _ = poll.tick() => {
                    let current = self.probe.parent_pid();
                    if is_orphaned(original_parent, current) {
                        tracing::warn!(parent = current, "Coordinator process has exited. Shutting down...");
                        return StopCause::Orphaned;
                    }
                }
                name = interrupts.recv() => {
                    tracing::debug!(signal = name, "Signal received but waiting for shutdown message from the coordinator");
                }
            }
        }
    }

    async fn stop(&mut self) -> AgentExit {
        self.state = AgentState::Stopping;
        match self.instance.stop().await {
            Ok(()) => {
                tracing::info!("Worker stopped");
                self.state = AgentState::Stopped;
                AgentExit::Stopped
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "Unable to stop worker process. Exit worker with error");
                self.state = AgentState::Failed;
                AgentExit::Failed
            }
        }
    }
}

/// First tick one full period from now.
fn orphan_poll(period: Duration) -> Interval {
    let mut poll = interval_at(Instant::now() + period, period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll
}

async fn send<W>(writer: &mut W, message: Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.to_line().map_err(std::io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    #[derive(Default)]
    struct Unit {
        hang_start: bool,
        fail_start: bool,
        fail_stop: bool,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Instance for Unit {
        async fn start(&mut self) -> anyhow::Result<()> {
            if self.hang_start {
                std::future::pending::<()>().await;
            }
            if self.fail_start {
                anyhow::bail!("port already in use");
            }
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                anyhow::bail!("connections did not drain");
            }
            Ok(())
        }
    }

    struct Coordinator {
        from_agent: ReadHalf<DuplexStream>,
        to_agent: WriteHalf<DuplexStream>,
    }

    impl Coordinator {
        async fn read_line(&mut self) -> String {
            let mut line = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                let n = self.from_agent.read(&mut byte).await.unwrap();
                if n == 0 || byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            String::from_utf8(line).unwrap()
        }

        async fn send(&mut self, raw: &str) {
            self.to_agent.write_all(raw.as_bytes()).await.unwrap();
        }
    }

    fn options() -> AgentOptions {
        AgentOptions {
            orphan_poll: Duration::from_millis(50),
            handle_signals: false,
        }
    }

    fn spawn_agent(
        unit: Unit,
        parent: Arc<AtomicU32>,
    ) -> (
        Coordinator,
        tokio::task::JoinHandle<(AgentExit, AgentState)>,
    ) {
        let (coordinator, worker) = tokio::io::duplex(1024);
        let (from_agent, to_agent) = tokio::io::split(coordinator);
        let (agent_in, agent_out) = tokio::io::split(worker);
        let mut agent = Agent::new(unit, options())
            .with_parent_probe(move || parent.load(Ordering::SeqCst));
        let task = tokio::spawn(async move {
            let exit = agent.run(agent_in, agent_out).await;
            (exit, agent.state())
        });
        (
            Coordinator {
                from_agent,
                to_agent,
            },
            task,
        )
    }

    fn parent() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(4242))
    }

    #[tokio::test]
    async fn test_ready_then_shutdown_stops_cleanly() {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Unit {
            stops: stops.clone(),
            ..Default::default()
        };
        let (mut coordinator, task) = spawn_agent(unit, parent());

        assert_eq!(coordinator.read_line().await, "{\"status\":\"ready\"}");
        coordinator.send("{\"status\":\"shutdown\"}\n").await;

        let (exit, state) = task.await.unwrap();
        assert_eq!(exit, AgentExit::Stopped);
        assert_eq!(exit.code(), 0);
        assert_eq!(state, AgentState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_never_sends_ready() {
        let unit = Unit {
            fail_start: true,
            ..Default::default()
        };
        let (mut coordinator, task) = spawn_agent(unit, parent());

        let (exit, state) = task.await.unwrap();
        assert_eq!(exit, AgentExit::Failed);
        assert_eq!(exit.code(), 1);
        assert_eq!(state, AgentState::Failed);

        // The agent dropped its end without writing anything.
        assert_eq!(coordinator.read_line().await, "");
    }

    #[tokio::test]
    async fn test_stop_failure_exits_with_error() {
        let unit = Unit {
            fail_stop: true,
            ..Default::default()
        };
        let (mut coordinator, task) = spawn_agent(unit, parent());

        coordinator.read_line().await;
        coordinator.send("{\"status\":\"shutdown\"}\n").await;

        let (exit, state) = task.await.unwrap();
        assert_eq!(exit, AgentExit::Failed);
        assert_eq!(state, AgentState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_messages_are_ignored() {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Unit {
            stops: stops.clone(),
            ..Default::default()
        };
        let (mut coordinator, task) = spawn_agent(unit, parent());

        coordinator.read_line().await;
        coordinator
            .send("{\"status\":\"restart\"}\nnot json\n{\"status\":\"ready\"}\n")
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert!(!task.is_finished());

        coordinator.send("{\"status\":\"shutdown\"}\n").await;
        let (exit, _) = task.await.unwrap();
        assert_eq!(exit, AgentExit::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_runs_stop_path() {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Unit {
            stops: stops.clone(),
            ..Default::default()
        };
        let (mut coordinator, task) = spawn_agent(unit, parent());

        coordinator.read_line().await;
        drop(coordinator);

        let (exit, _) = task.await.unwrap();
        assert_eq!(exit, AgentExit::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_detected_within_one_poll_interval() {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Unit {
            stops: stops.clone(),
            ..Default::default()
        };
        let parent_pid = parent();
        let (mut coordinator, task) = spawn_agent(unit, parent_pid.clone());

        coordinator.read_line().await;
        parent_pid.store(INIT_PID, Ordering::SeqCst);
        let orphaned_at = Instant::now();

        let (exit, state) = task.await.unwrap();
        assert!(orphaned_at.elapsed() <= options().orphan_poll);
        assert_eq!(exit, AgentExit::Stopped);
        assert_eq!(state, AgentState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // Stopped without any shutdown message from the coordinator.
        drop(coordinator);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_detected_while_unit_is_starting() {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Unit {
            hang_start: true,
            stops: stops.clone(),
            ..Default::default()
        };
        let parent_pid = parent();
        let (mut coordinator, task) = spawn_agent(unit, parent_pid.clone());

        // Let the agent record its parent and enter the pending start.
        tokio::task::yield_now().await;
        parent_pid.store(INIT_PID, Ordering::SeqCst);

        let (exit, state) = tokio::time::timeout(options().orphan_poll * 3, task)
            .await
            .expect("agent outlived its coordinator")
            .unwrap();
        assert_eq!(exit, AgentExit::Stopped);
        assert_eq!(state, AgentState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // No ready message was ever sent.
        assert_eq!(coordinator.read_line().await, "");
    }
}
