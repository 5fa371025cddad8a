//! Path helpers for the run directory and its sockets.

use std::path::{Path, PathBuf};

/// Settings file looked up in the working directory.
pub const SETTINGS_FILENAME: &str = "warmpool.json";

/// Default control-socket directory, relative to the working directory.
pub const DEFAULT_SOCKET_DIR: &str = ".warmpool/run/";

/// Default pidfile, relative to the working directory.
pub const DEFAULT_PIDFILE: &str = ".warmpool/warmpool.pid";

const CONTROLLER_SOCKET: &str = "controller.sock";

/// Administrative socket inside the socket directory.
pub fn controller_socket<P: AsRef<Path>>(socket_dir: P) -> PathBuf {
    socket_dir.as_ref().join(CONTROLLER_SOCKET)
}

/// Per-slot worker socket inside the socket directory.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use warmpool::paths::worker_socket;
///
/// assert_eq!(
///     worker_socket("/srv/app/.warmpool/run", 3),
///     PathBuf::from("/srv/app/.warmpool/run/worker-3.sock")
/// );
/// ```
pub fn worker_socket<P: AsRef<Path>>(socket_dir: P, id: usize) -> PathBuf {
    socket_dir.as_ref().join(format!("worker-{}.sock", id))
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// This handles the common case where shell tilde expansion doesn't occur,
/// such as `--socket-path=~/run` or a path written into the settings file.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use warmpool::paths::expand_tilde;
///
/// let path = PathBuf::from("/tmp/foo");
/// assert_eq!(expand_tilde(&path), path);
/// ```
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}

/// Resolve a configured path against the working directory.
///
/// Tildes are expanded first; absolute paths are returned unchanged.
pub fn anchor<P: AsRef<Path>>(work_dir: &Path, path: P) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        expanded
    } else {
        work_dir.join(expanded)
    }
}
