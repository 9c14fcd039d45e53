// ABOUTME: Wire protocol shared by the coordinator and its workers.
// ABOUTME: Messages are JSON objects, one per line, tagged by a "status" field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol message.
///
/// `Ready` flows from a worker to the coordinator once its unit has started;
/// `Shutdown` flows from the coordinator to a worker. There are no other kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Message {
    Ready,
    Shutdown,
}

impl Message {
    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line. Unknown discriminants are an error.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Ready => f.write_str("ready"),
            Message::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Process-unique identity of a worker (the OS process id for real workers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(pid: u32) -> Self {
        WorkerId(pid)
    }
}

/// How a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with status code. 0 is an orderly stop.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
    /// The exit could not be observed.
    Unknown,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(signo) => write!(f, "signal {}", signo),
            ExitStatus::Unknown => f.write_str("unknown status"),
        }
    }
}

#[cfg(unix)]
impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Exited(code),
            (None, Some(signo)) => ExitStatus::Signaled(signo),
            (None, None) => ExitStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(Message::Ready.to_line().unwrap(), "{\"status\":\"ready\"}\n");
        assert_eq!(
            Message::Shutdown.to_line().unwrap(),
            "{\"status\":\"shutdown\"}\n"
        );
    }

    #[test]
    fn test_parse_line_with_whitespace() {
        let parsed = Message::from_line("  {\"status\": \"shutdown\"}\r\n").unwrap();
        assert_eq!(parsed, Message::Shutdown);
    }

    #[test]
    fn test_rejects_unknown_status() {
        assert!(Message::from_line("{\"status\":\"restart\"}").is_err());
        assert!(Message::from_line("{\"status\":\"READY\"}").is_err());
        assert!(Message::from_line("{\"type\":\"ready\"}").is_err());
        assert!(Message::from_line("ready").is_err());
        assert!(Message::from_line("").is_err());
    }

    #[test]
    fn test_exit_status_success() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::Signaled(9).success());
        assert!(!ExitStatus::Unknown.success());
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Exited(1).to_string(), "exit code 1");
        assert_eq!(ExitStatus::Signaled(15).to_string(), "signal 15");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_from_std() {
        use std::os::unix::process::ExitStatusExt;

        let exited = std::process::ExitStatus::from_raw(1 << 8);
        assert_eq!(ExitStatus::from(exited), ExitStatus::Exited(1));

        let killed = std::process::ExitStatus::from_raw(9);
        assert_eq!(ExitStatus::from(killed), ExitStatus::Signaled(9));
    }

    #[test]
    fn test_worker_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&WorkerId(4242)).unwrap(), "4242");
        assert_eq!(WorkerId::from(7).to_string(), "7");
    }
}
