//! Single-instance guard.
//!
//! The supervisor writes its pid on startup and removes the file on exit. A
//! leftover file whose process is gone is treated as stale and replaced.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::error::{Result, WarmpoolError};

/// A held pidfile. Removed on drop if it still carries our pid.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Claim `path` for this process.
    pub fn acquire(path: &Path) -> Result<Self> {
        let own = std::process::id();

        if let Some(pid) = read(path) {
            if pid != own && process_exists(pid) {
                return Err(WarmpoolError::AlreadyRunning {
                    pid,
                    path: path.to_path_buf(),
                });
            }
            tracing::warn!(pid, path = %path.display(), "Replacing stale pidfile");
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}\n", own))?;

        Ok(Self {
            path: path.to_path_buf(),
            pid: own,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if read(&self.path) == Some(self.pid) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Pid recorded in `path`, if the file exists and parses.
pub fn read(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a process with this pid exists.
pub fn process_exists(pid: u32) -> bool {
    // Rejects 0 (our process group) and anything beyond pid_t
    let Some(raw) = i32::try_from(pid).ok().filter(|p| *p > 0) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // Exists, but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_and_release_removes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/warmpool.pid");

        let pidfile = PidFile::acquire(&path).unwrap();
        assert_eq!(read(&path), Some(std::process::id()));
        assert_eq!(pidfile.path(), path);

        drop(pidfile);
        assert!(!path.exists());
    }

    #[test]
    fn test_live_process_blocks_acquire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warmpool.pid");
        // pid 1 always exists
        std::fs::write(&path, "1\n").unwrap();

        let err = PidFile::acquire(&path).unwrap_err();
        assert!(matches!(err, WarmpoolError::AlreadyRunning { pid: 1, .. }));
        assert_eq!(read(&path), Some(1));
    }

    #[test]
    fn test_stale_pidfile_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warmpool.pid");
        // Beyond any pid_max
        std::fs::write(&path, format!("{}\n", i32::MAX)).unwrap();

        let _pidfile = PidFile::acquire(&path).unwrap();
        assert_eq!(read(&path), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_pidfile_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warmpool.pid");
        std::fs::write(&path, "not a pid").unwrap();
        assert!(PidFile::acquire(&path).is_ok());
    }

    #[test]
    fn test_process_exists() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(0));
        assert!(!process_exists(u32::MAX));
    }
}
