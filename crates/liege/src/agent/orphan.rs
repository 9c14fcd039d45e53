// ABOUTME: Parent-process probe used by workers to detect a vanished coordinator.
// ABOUTME: A worker is orphaned once its parent pid becomes init's or otherwise changes.

/// pid of init, which adopts orphaned processes
pub const INIT_PID: u32 = 1;

/// Reports the current parent process id.
pub trait ParentProbe: Send + Sync {
    fn parent_pid(&self) -> u32;
}

/// Reads the real parent pid from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsParent;

impl ParentProbe for OsParent {
    fn parent_pid(&self) -> u32 {
        std::os::unix::process::parent_id()
    }
}

impl<F> ParentProbe for F
where
    F: Fn() -> u32 + Send + Sync,
{
    fn parent_pid(&self) -> u32 {
        self()
    }
}

/// True if a process whose parent was `original` now has parent `current`
/// and should consider itself orphaned.
pub fn is_orphaned(original: u32, current: u32) -> bool {
    current == INIT_PID || current == 0 || current != original
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_parent_is_not_orphaned() {
        assert!(!is_orphaned(4242, 4242));
    }

    #[test]
    fn test_reparented_to_init_is_orphaned() {
        assert!(is_orphaned(4242, INIT_PID));
    }

    #[test]
    fn test_reparented_to_subreaper_is_orphaned() {
        assert!(is_orphaned(4242, 777));
    }

    #[test]
    fn test_os_parent_matches_std() {
        assert_eq!(OsParent.parent_pid(), std::os::unix::process::parent_id());
    }

    #[test]
    fn test_closure_probe() {
        let probe = || 99;
        assert_eq!(probe.parent_pid(), 99);
    }
}
