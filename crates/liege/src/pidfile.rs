// ABOUTME: PID file helpers for the coordinator process.
// ABOUTME: The file holds the coordinator's pid as plain decimal text.

use std::fs;
use std::io;
use std::path::Path;

/// Write our own pid to `path`, creating parent directories as needed.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, std::process::id().to_string())
}

/// Read the pid stored in `path`. `Ok(None)` if the file does not exist.
///
/// Only values that name a single process other than init are accepted;
/// 0 and negative values address process groups when used with `kill`.
pub fn read_pid_file(path: &Path) -> io::Result<Option<i32>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let pid: i32 = contents
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if pid <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a coordinator pid", pid),
        ));
    }
    Ok(Some(pid))
}

pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
