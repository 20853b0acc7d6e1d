//! PID file utilities for daemon running detection.
//!
//! The daemon writes its PID to `<data_dir>/daemon.pid` on start and removes
//! it on exit. The CLI reads it to find (and, with `stop --force`, signal) a
//! running daemon. A file naming a process that no longer exists is stale and
//! is removed on sight.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Writes the current process id to `path`, creating parent directories.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("Failed to write PID file: {}", path.display()))?;
    Ok(())
}

/// Removes the PID file if it still names this process.
pub fn remove_pid_file(path: &Path) {
    if read_pid(path) == Some(std::process::id()) {
        let _ = fs::remove_file(path);
    }
}

/// Returns the PID of a running daemon, if any. Cleans up stale files.
pub fn get_daemon_pid(path: &Path) -> Option<u32> {
    let pid = match read_pid(path) {
        Some(pid) => pid,
        None => {
            if path.exists() {
                cleanup_stale_pid_file(path);
            }
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

pub fn is_daemon_running(path: &Path) -> bool {
    get_daemon_pid(path).is_some()
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Checks whether a process with the given PID exists.
///
/// On Linux this checks `/proc/{pid}/stat`; elsewhere it sends signal 0.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}/stat", pid)).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    tracing::debug!(path = %path.display(), "Removing stale PID file");
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_own_pid() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("daemon.pid");

        write_pid_file(&path).unwrap();
        assert_eq!(get_daemon_pid(&path), Some(std::process::id()));
        assert!(is_daemon_running(&path));

        remove_pid_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_no_file_means_not_running() {
        let temp_dir = tempdir().unwrap();
        assert_eq!(get_daemon_pid(&temp_dir.path().join("daemon.pid")), None);
    }

    #[test]
    fn test_stale_pid_file_is_cleaned_up() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        fs::write(&path, "4000000000\n").unwrap();

        assert_eq!(get_daemon_pid(&path), None);
        assert!(!path.exists(), "Stale PID file should be cleaned up");
    }

    #[test]
    fn test_garbage_pid_file_is_cleaned_up() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        fs::write(&path, "not a pid").unwrap();

        assert!(!is_daemon_running(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_leaves_foreign_pid_alone() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        fs::write(&path, "1\n").unwrap();

        remove_pid_file(&path);
        assert!(path.exists());
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(4_000_000_000));
    }
}
