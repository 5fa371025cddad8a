//! Supervisor settings.
//!
//! Settings are read from `warmpool.json` (kebab-case keys, unknown keys
//! ignored), then overridden by environment variables and CLI flags, then
//! validated once. After startup they are immutable and shared behind an
//! `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::MAX_BODY_BYTES;
use crate::error::{Result, WarmpoolError};
use crate::memory::MemorySize;
use crate::paths;

/// Effective configuration of one supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Listen host for inbound HTTP.
    pub host: String,
    /// Listen port for inbound HTTP (0 picks an ephemeral port).
    pub port: u16,
    /// Number of worker slots.
    pub workers: usize,
    /// Application environment handed to workers.
    pub app_env: String,
    /// Verbose logging and reload-on-change.
    pub debug: bool,
    /// HTTP access log.
    pub logging: bool,
    /// Static document root; empty disables static serving.
    pub static_directory: PathBuf,
    /// Requests an incarnation may serve before recycling; 0 is unlimited.
    pub max_requests: u64,
    /// Seconds a single dispatch may run; zero or negative disables.
    pub max_execution_time: i64,
    /// Resident memory ceiling per worker in MiB; zero or negative disables.
    pub memory_limit: i64,
    /// Seconds an incarnation may live; zero or negative disables.
    pub ttl: i64,
    /// Application bootstrap identifier handed to workers.
    pub bootstrap: String,
    /// Worker program; empty runs this binary's built-in worker.
    pub worker_executable: PathBuf,
    /// Extra arguments for `worker-executable`.
    pub worker_args: Vec<String>,
    /// Directory holding the controller and worker sockets.
    pub socket_path: PathBuf,
    pub pidfile: PathBuf,
    /// Seconds a draining worker may keep running before it is killed.
    pub reload_timeout: i64,
    /// Seconds a new incarnation has to send REGISTER and READY.
    pub startup_timeout: u64,
    /// Consecutive failed spawns tolerated per slot.
    pub spawn_attempts: u32,
    /// Requests allowed to wait for a free worker.
    pub queue_capacity: usize,
    /// How long a queued request may wait, in milliseconds.
    pub queue_timeout_ms: u64,
    /// Request body limit in bytes.
    pub max_body_size: usize,
    /// Paths watched for changes in debug mode.
    pub watch: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: default_workers(),
            app_env: "dev".to_string(),
            debug: false,
            logging: true,
            static_directory: PathBuf::new(),
            max_requests: 1000,
            max_execution_time: 30,
            memory_limit: -1,
            ttl: 300,
            bootstrap: "default".to_string(),
            worker_executable: PathBuf::new(),
            worker_args: Vec::new(),
            socket_path: PathBuf::from(paths::DEFAULT_SOCKET_DIR),
            pidfile: PathBuf::from(paths::DEFAULT_PIDFILE),
            reload_timeout: 30,
            startup_timeout: 30,
            spawn_attempts: 5,
            queue_capacity: 64,
            queue_timeout_ms: 1000,
            max_body_size: 16 * 1024 * 1024,
            watch: vec![PathBuf::from(".")],
        }
    }
}

/// At least eight workers, more on machines with more cores.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(8)
}

fn positive_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

impl Settings {
    /// Path of the settings file for `work_dir`, honouring an explicit `--config`.
    pub fn locate(work_dir: &Path, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => paths::anchor(work_dir, path),
            None => work_dir.join(paths::SETTINGS_FILENAME),
        }
    }

    /// Read a settings file. Keys missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WarmpoolError::InvalidSettings(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            WarmpoolError::InvalidSettings(format!("{} is not valid: {}", path.display(), e))
        })
    }

    /// Load the settings file if present, otherwise start from defaults.
    ///
    /// An explicitly requested file that does not exist is an error.
    pub fn load(work_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(work_dir, explicit);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading settings file");
            Self::from_file(&path)
        } else if explicit.is_some() {
            Err(WarmpoolError::InvalidSettings(format!(
                "settings file {} does not exist",
                path.display()
            )))
        } else {
            Ok(Self::default())
        }
    }

    /// Write these settings as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Make every relative path absolute against `work_dir`.
    pub fn anchor_paths(&mut self, work_dir: &Path) {
        self.socket_path = paths::anchor(work_dir, &self.socket_path);
        self.pidfile = paths::anchor(work_dir, &self.pidfile);
        if !self.static_directory.as_os_str().is_empty() {
            self.static_directory = paths::anchor(work_dir, &self.static_directory);
        }
        if !self.worker_executable.as_os_str().is_empty()
            && self.worker_executable.components().count() > 1
        {
            self.worker_executable = paths::anchor(work_dir, &self.worker_executable);
        }
        self.watch = self
            .watch
            .iter()
            .map(|p| paths::anchor(work_dir, p))
            .collect();
    }

    /// Reject settings the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WarmpoolError::InvalidSettings(msg));

        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if self.host.trim().is_empty() {
            return invalid("host must not be empty".into());
        }
        if self.reload_timeout < 0 {
            return invalid(format!(
                "reload-timeout must be 0 or more seconds, got {}",
                self.reload_timeout
            ));
        }
        if self.startup_timeout == 0 {
            return invalid("startup-timeout must be at least 1 second".into());
        }
        if self.spawn_attempts == 0 {
            return invalid("spawn-attempts must be at least 1".into());
        }
        if self.max_body_size > MAX_BODY_BYTES {
            return invalid(format!(
                "max-body-size must be at most {} bytes, got {}",
                MAX_BODY_BYTES, self.max_body_size
            ));
        }
        if let Some(root) = self.static_root()
            && !root.is_dir()
        {
            return invalid(format!(
                "static-directory {} is not a directory",
                root.display()
            ));
        }
        if !self.worker_executable.as_os_str().is_empty()
            && self.worker_executable.components().count() > 1
            && !self.worker_executable.is_file()
        {
            return invalid(format!(
                "worker-executable {} does not exist",
                self.worker_executable.display()
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn static_root(&self) -> Option<&Path> {
        if self.static_directory.as_os_str().is_empty() {
            None
        } else {
            Some(&self.static_directory)
        }
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        positive_secs(self.max_execution_time)
    }

    pub fn ttl(&self) -> Option<Duration> {
        positive_secs(self.ttl)
    }

    pub fn memory_limit(&self) -> Option<MemorySize> {
        MemorySize::from_setting(self.memory_limit)
    }

    pub fn max_requests(&self) -> Option<u64> {
        (self.max_requests > 0).then_some(self.max_requests)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.reload_timeout).unwrap_or(0))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Flattened `(key, value)` view for rendering, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, rendered)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8080);
        assert!(settings.workers >= 8);
        assert_eq!(settings.max_requests(), Some(1000));
        assert_eq!(settings.max_execution_time(), Some(Duration::from_secs(30)));
        assert_eq!(settings.ttl(), Some(Duration::from_secs(300)));
        assert_eq!(settings.memory_limit(), None);
        assert_eq!(settings.reload_timeout(), Duration::from_secs(30));
        assert!(settings.static_root().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_disabled_limits() {
        let settings = Settings {
            max_requests: 0,
            max_execution_time: -1,
            ttl: 0,
            memory_limit: 256,
            ..Settings::default()
        };
        assert_eq!(settings.max_requests(), None);
        assert_eq!(settings.max_execution_time(), None);
        assert_eq!(settings.ttl(), None);
        assert_eq!(settings.memory_limit(), Some(MemorySize::from_mib(256)));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("warmpool.json"),
            r#"{ "port": 9000, "workers": 2, "max-requests": 5, "unknown-key": true }"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path(), None).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.max_requests, 5);
        assert_eq!(settings.host, "127.0.0.1");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path(), None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(dir.path(), Some(Path::new("nope.json"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("warmpool.json"), "{ port: }").unwrap();
        assert!(matches!(
            Settings::load(dir.path(), None),
            Err(WarmpoolError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/warmpool.json");
        let settings = Settings {
            workers: 3,
            app_env: "prod".to_string(),
            ..Settings::default()
        };
        settings.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"app-env\": \"prod\""));
        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_anchor_paths() {
        let mut settings = Settings {
            static_directory: PathBuf::from("public"),
            ..Settings::default()
        };
        settings.anchor_paths(Path::new("/srv/app"));
        assert_eq!(settings.socket_path, PathBuf::from("/srv/app/.warmpool/run/"));
        assert_eq!(settings.pidfile, PathBuf::from("/srv/app/.warmpool/warmpool.pid"));
        assert_eq!(settings.static_directory, PathBuf::from("/srv/app/public"));
        assert_eq!(settings.watch, vec![PathBuf::from("/srv/app/.")]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            Settings {
                workers: 0,
                ..Settings::default()
            },
            Settings {
                host: " ".to_string(),
                ..Settings::default()
            },
            Settings {
                reload_timeout: -1,
                ..Settings::default()
            },
            Settings {
                spawn_attempts: 0,
                ..Settings::default()
            },
            Settings {
                static_directory: PathBuf::from("/definitely/not/here"),
                ..Settings::default()
            },
            Settings {
                worker_executable: PathBuf::from("/definitely/not/a/binary"),
                ..Settings::default()
            },
            Settings {
                max_body_size: MAX_BODY_BYTES + 1,
                ..Settings::default()
            },
        ];
        for settings in cases {
            assert!(settings.validate().is_err(), "accepted {:?}", settings);
        }

        let largest = Settings {
            max_body_size: MAX_BODY_BYTES,
            ..Settings::default()
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_entries_are_kebab_case() {
        let entries = Settings::default().entries();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"max-execution-time"));
        assert!(keys.contains(&"socket-path"));
        let host = entries.iter().find(|(k, _)| k == "host").unwrap();
        assert_eq!(host.1, "127.0.0.1");
    }
}
