//! Worker subprocess spawning.
//!
//! Workers are plain child processes. Everything a worker needs to find its
//! way back is passed through the environment; the only contract is that it
//! connects to `WARMPOOL_CONTROL_SOCKET` and speaks the control protocol.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use super::proc::{OsProcess, WorkerProcess};
use crate::error::{Result, WarmpoolError};
use crate::settings::Settings;

/// Path of the per-slot socket the worker must connect to.
pub const ENV_CONTROL_SOCKET: &str = "WARMPOOL_CONTROL_SOCKET";
pub const ENV_WORKER_ID: &str = "WARMPOOL_WORKER_ID";
pub const ENV_BOOTSTRAP: &str = "WARMPOOL_BOOTSTRAP";
pub const ENV_APP_ENV: &str = "WARMPOOL_APP_ENV";
/// `1` when the supervisor runs in debug mode.
pub const ENV_DEBUG: &str = "WARMPOOL_DEBUG";

/// Subcommand that runs the built-in worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// What one incarnation is told at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub id: usize,
    pub socket: PathBuf,
    pub bootstrap: String,
    pub app_env: String,
    pub debug: bool,
}

/// Starts worker processes.
///
/// Called from inside the runtime, once per incarnation. Failing here counts
/// as a failed spawn attempt for the slot.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>>;
}

/// Launches an executable as the worker.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `worker-executable` if set, otherwise this binary in worker mode.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if !settings.worker_executable.as_os_str().is_empty() {
            return Ok(Self::new(
                settings.worker_executable.clone(),
                settings.worker_args.clone(),
            ));
        }

        let exe_path = std::env::current_exe().map_err(|e| {
            WarmpoolError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        let mut args = vec![WORKER_SUBCOMMAND.to_string()];
        args.extend(settings.worker_args.iter().cloned());
        Ok(Self::new(exe_path, args))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        cmd.env(ENV_CONTROL_SOCKET, &spec.socket);
        cmd.env(ENV_WORKER_ID, spec.id.to_string());
        cmd.env(ENV_BOOTSTRAP, &spec.bootstrap);
        cmd.env(ENV_APP_ENV, &spec.app_env);
        cmd.env(ENV_DEBUG, if spec.debug { "1" } else { "0" });

        // Worker output goes to the supervisor's stdout/stderr
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            WarmpoolError::Worker(format!(
                "Failed to spawn worker {}: {}",
                self.program.display(),
                e
            ))
        })?;

        tracing::debug!(
            worker_id = spec.id,
            pid = ?child.id(),
            program = %self.program.display(),
            "Spawned worker process"
        );
        Ok(Box::new(OsProcess::new(child)))
    }
}
