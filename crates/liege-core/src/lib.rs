// ABOUTME: Shared types and configuration for liege.
// ABOUTME: Contains config parsing and the coordinator/worker wire protocol.

pub mod config;
pub mod protocol;

pub use config::{Config, WorkerCommand};
pub use protocol::{ExitStatus, Message, WorkerId};
