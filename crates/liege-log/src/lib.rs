// ABOUTME: Shared logging setup for the coordinator and worker processes
// ABOUTME: Logs never touch stdout, which carries the worker message channel

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(default_filter())
        .init();
}

/// Append logs to `path` instead of stderr. Default: INFO level, RUST_LOG override.
/// If the file cannot be opened, prints a warning to stderr and falls back to `init()`.
pub fn init_file(path: &Path) {
    match open_log_file(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_env_filter(default_filter())
                .with_ansi(false)
                .init();
        }
        Err(e) => {
            eprintln!(
                "Warning: failed to open log file {}: {e}; logging to stderr",
                path.display()
            );
            init();
        }
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
