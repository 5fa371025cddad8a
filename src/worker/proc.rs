//! Handles to running worker processes.
//!
//! The pool never touches `tokio::process` directly: it drives a
//! [`WorkerProcess`], which is what the launcher seam hands back. Tests supply
//! in-process fakes through the same trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::Instant;

use super::signals::{TerminationReason, analyze_exit_status};
use crate::memory::MemorySize;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Grace between SIGTERM and SIGKILL once a stop deadline has passed.
const TERM_GRACE: Duration = Duration::from_millis(100);

/// A launched worker process.
pub trait WorkerProcess: Send {
    /// OS process id, if the process has one.
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel-safe: it is raced
    /// against socket reads and timers and may be dropped and re-polled.
    fn wait(&mut self) -> BoxFuture<'_, TerminationReason>;

    /// Ask the process to exit (SIGTERM). Does not wait.
    fn terminate(&mut self);

    /// Kill the process and reap it.
    fn kill(&mut self) -> BoxFuture<'_, TerminationReason>;
}

/// A real child process.
pub struct OsProcess {
    child: Child,
    pid: Option<u32>,
    exited: Option<TerminationReason>,
}

impl OsProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            exited: None,
        }
    }
}

impl WorkerProcess for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(&mut self) -> BoxFuture<'_, TerminationReason> {
        Box::pin(async move {
            if let Some(ref reason) = self.exited {
                return reason.clone();
            }
            let reason = match self.child.wait().await {
                Ok(status) => analyze_exit_status(status),
                Err(e) => {
                    tracing::warn!(pid = ?self.pid, error = %e, "waitpid failed");
                    TerminationReason::Unknown
                }
            };
            self.exited = Some(reason.clone());
            reason
        })
    }

    fn terminate(&mut self) {
        if self.exited.is_some() {
            return;
        }
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }

    fn kill(&mut self) -> BoxFuture<'_, TerminationReason> {
        Box::pin(async move {
            if let Some(ref reason) = self.exited {
                return reason.clone();
            }
            let _ = self.child.start_kill();
            let reason = match self.child.wait().await.map(analyze_exit_status) {
                // Our own SIGKILL, not the OOM killer.
                Ok(TerminationReason::OutOfMemory) | Err(_) => TerminationReason::ForceKilled,
                Ok(other) => other,
            };
            self.exited = Some(reason.clone());
            reason
        })
    }
}

/// Wait until `deadline` for a voluntary exit, then SIGTERM, then SIGKILL.
pub async fn stop_by(process: &mut dyn WorkerProcess, deadline: Instant) -> TerminationReason {
    if let Ok(reason) = tokio::time::timeout_at(deadline, process.wait()).await {
        return reason;
    }

    tracing::warn!(pid = ?process.pid(), "Worker did not exit in time, terminating");
    process.terminate();
    if let Ok(reason) = tokio::time::timeout(TERM_GRACE, process.wait()).await {
        return reason;
    }

    process.kill().await
}

/// Resident set size of a process, from `/proc/<pid>/status`.
#[cfg(target_os = "linux")]
pub fn resident_memory(pid: u32) -> Option<MemorySize> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(MemorySize::from_kib(kib))
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory(_pid: u32) -> Option<MemorySize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn(program: &str, args: &[&str]) -> OsProcess {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn test process");
        OsProcess::new(child)
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let mut proc = spawn("sh", &["-c", "exit 3"]);
        assert!(proc.pid().is_some());
        assert_eq!(proc.wait().await, TerminationReason::Exited(3));
        // A second wait returns the cached reason.
        assert_eq!(proc.wait().await, TerminationReason::Exited(3));
    }

    #[tokio::test]
    async fn test_kill_is_force_killed() {
        let mut proc = spawn("sleep", &["60"]);
        assert_eq!(proc.kill().await, TerminationReason::ForceKilled);
    }

    #[tokio::test]
    async fn test_stop_by_terminates_after_deadline() {
        let mut proc = spawn("sleep", &["60"]);
        let deadline = Instant::now() + Duration::from_millis(50);
        let reason = stop_by(&mut proc, deadline).await;
        assert_eq!(reason, TerminationReason::Signaled(Signal::SIGTERM));
    }

    #[tokio::test]
    async fn test_stop_by_returns_early_on_exit() {
        let mut proc = spawn("true", &[]);
        let deadline = Instant::now() + Duration::from_secs(10);
        assert_eq!(stop_by(&mut proc, deadline).await, TerminationReason::Exited(0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resident_memory_of_self() {
        let rss = resident_memory(std::process::id()).expect("own rss");
        assert!(rss.as_bytes() > 0);
        assert!(resident_memory(u32::MAX).is_none());
    }
}
