//! Classification of how a worker incarnation ended.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// Reason why a worker incarnation terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal we did not send.
    Signaled(Signal),
    /// SIGKILL we did not send; on Linux almost always the OOM killer.
    OutOfMemory,
    /// Killed by the supervisor (drain deadline, shutdown, cancelled startup).
    ForceKilled,
    /// Killed because a dispatch exceeded `max-execution-time`.
    ExecutionTimeout,
    /// The worker closed its control connection but did not exit.
    ConnectionLost,
    /// The worker sent something that is not valid at this point.
    ProtocolError(String),
    Unknown,
}

impl TerminationReason {
    /// Whether this counts towards crash-loop damping.
    ///
    /// Kills the supervisor ordered itself are not crashes.
    pub fn counts_as_crash(&self) -> bool {
        !matches!(self, Self::ForceKilled | Self::ExecutionTimeout)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {}", sig.as_str()),
            Self::OutOfMemory => "out of memory (SIGKILL from OOM killer)".to_string(),
            Self::ForceKilled => "force-killed by the supervisor".to_string(),
            Self::ExecutionTimeout => "killed after exceeding max-execution-time".to_string(),
            Self::ConnectionLost => "closed its control connection".to_string(),
            Self::ProtocolError(msg) => format!("protocol error: {}", msg),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze an `ExitStatus` to determine the termination reason.
pub fn analyze_exit_status(status: ExitStatus) -> TerminationReason {
    if let Some(code) = status.code() {
        return TerminationReason::Exited(code);
    }

    match status.signal().map(Signal::try_from) {
        Some(Ok(Signal::SIGKILL)) => TerminationReason::OutOfMemory,
        Some(Ok(signal)) => TerminationReason::Signaled(signal),
        _ => TerminationReason::Unknown,
    }
}
