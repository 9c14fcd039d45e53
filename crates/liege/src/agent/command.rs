// ABOUTME: Built-in worker unit that runs a configured external command.
// ABOUTME: Stops it with SIGTERM, escalating to SIGKILL after a grace period.

use super::Instance;
use anyhow::{Context, Result};
use async_trait::async_trait;
use liege_core::WorkerCommand;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::fd::AsFd;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// How long a freshly started command must survive to count as started.
const STARTUP_CHECK: Duration = Duration::from_millis(100);

pub struct CommandInstance {
    command: WorkerCommand,
    child: Option<Child>,
}

impl CommandInstance {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Instance for CommandInstance {
    async fn start(&mut self) -> Result<()> {
        // Our stdout is the coordinator channel; the command writes to stderr instead.
        let stdout = std::io::stderr()
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate stderr")?;

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            // Keep terminal interrupts aimed at the coordinator away from the command.
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command.program))?;

        tokio::time::sleep(STARTUP_CHECK).await;
        if let Some(status) = child.try_wait()? {
            anyhow::bail!("{} exited during startup with {}", self.command.program, status);
        }

        tracing::info!(program = %self.command.program, pid = ?child.id(), "Started command");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            anyhow::bail!("{} had already exited with {}", self.command.program, status);
        }

        if let Some(pid) = child.id() {
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .with_context(|| format!("Failed to send SIGTERM to {}", pid))?;
        }

        let grace = self.command.stop_grace();
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                let terminated = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal() == Some(Signal::SIGTERM as i32)
                };
                if status.success() || terminated {
                    tracing::info!(program = %self.command.program, status = %status, "Command stopped");
                    Ok(())
                } else {
                    anyhow::bail!("{} stopped with {}", self.command.program, status)
                }
            }
            Err(_) => {
                child.kill().await?;
                anyhow::bail!(
                    "{} did not stop within {:?} and was killed",
                    self.command.program,
                    grace
                )
            }
        }
    }
}
