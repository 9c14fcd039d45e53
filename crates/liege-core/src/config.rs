// ABOUTME: Configuration for the liege coordinator and its workers.
// ABOUTME: Loaded from a TOML file with sensible defaults.

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Signals that cannot be caught, or that already mean "shut down".
const RESERVED_SIGNALS: [Signal; 7] = [
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGINT,
    Signal::SIGTERM,
];

/// The command each worker runs as its supervised unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Program to execute
    pub program: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Seconds between SIGTERM and SIGKILL when stopping the program
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stop_grace_secs: default_stop_grace_secs(),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of workers in the pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// PID file written once the initial pool is ready (`~` is expanded)
    #[serde(default)]
    pub pid_file: Option<String>,

    /// Log file; logs go to stderr when unset (`~` is expanded)
    #[serde(default)]
    pub log_file: Option<String>,

    /// Signal that triggers a rolling reload (e.g. "SIGHUP")
    #[serde(default = "default_reload_signal")]
    pub reload_signal: String,

    /// Seconds to wait for a spawned worker's ready message
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Seconds to wait for a worker to exit after a shutdown message
    #[serde(default = "default_exit_timeout_secs")]
    pub exit_timeout_secs: u64,

    /// Milliseconds between a worker's orphan checks
    #[serde(default = "default_orphan_poll_ms")]
    pub orphan_poll_ms: u64,

    /// Supervised command
    pub worker: WorkerCommand,
}

fn default_workers() -> usize {
    4
}

fn default_reload_signal() -> String {
    "SIGHUP".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_exit_timeout_secs() -> u64 {
    30
}

fn default_orphan_poll_ms() -> u64 {
    1000
}

fn default_stop_grace_secs() -> u64 {
    10
}

impl Config {
    /// Build a config with defaults around the given worker command
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            workers: default_workers(),
            pid_file: None,
            log_file: None,
            reload_signal: default_reload_signal(),
            ready_timeout_secs: default_ready_timeout_secs(),
            exit_timeout_secs: default_exit_timeout_secs(),
            orphan_poll_ms: default_orphan_poll_ms(),
            worker,
        }
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/liege/liege.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| dirs::home_dir().map(|h| h.join(".config")).ok_or(()))
            .map_err(|_| anyhow::anyhow!("Could not determine config directory"))?
            .join("liege");
        Ok(config_dir.join("liege.toml"))
    }

    /// Reject values the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.program.trim().is_empty() {
            anyhow::bail!("worker.program must not be empty");
        }
        if self.ready_timeout_secs == 0 {
            anyhow::bail!("ready_timeout_secs must be greater than zero");
        }
        if self.exit_timeout_secs == 0 {
            anyhow::bail!("exit_timeout_secs must be greater than zero");
        }
        if self.orphan_poll_ms == 0 {
            anyhow::bail!("orphan_poll_ms must be greater than zero");
        }
        self.reload_signal()?;
        Ok(())
    }

    /// Parse the reload signal name. Accepts "SIGHUP" and "HUP" forms.
    pub fn reload_signal(&self) -> Result<Signal> {
        let name = self.reload_signal.trim().to_ascii_uppercase();
        let name = if name.starts_with("SIG") {
            name
        } else {
            format!("SIG{}", name)
        };
        let signal = Signal::from_str(&name)
            .with_context(|| format!("Unknown reload signal '{}'", self.reload_signal))?;
        if RESERVED_SIGNALS.contains(&signal) {
            anyhow::bail!("{} cannot be used as the reload signal", signal);
        }
        Ok(signal)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.exit_timeout_secs)
    }

    pub fn orphan_poll(&self) -> Duration {
        Duration::from_millis(self.orphan_poll_ms)
    }

    /// Expand ~ in the PID file path
    pub fn pid_file_expanded(&self) -> Option<PathBuf> {
        self.pid_file.as_deref().map(expand)
    }

    /// Expand ~ in the log file path
    pub fn log_file_expanded(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(expand)
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}
