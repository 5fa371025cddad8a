//! Messages into the supervisor loop, and the handle that sends them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::control::{StatusFilter, StatusReport, WorkerRequest, WorkerResponse};
use crate::error::{Result, WarmpoolError};

/// Supervisor lifecycle, in order. Never moves backwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Spawning the initial workers.
    Starting,
    Running,
    /// Stop requested; finishing in-flight work.
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// Why a request could not be answered by a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no worker became available in time")]
    Unavailable,

    #[error("worker {slot} did not answer within {}s", .after.as_secs())]
    Timeout { slot: usize, after: Duration },

    #[error("worker {slot} failed while handling the request: {reason}")]
    WorkerCrashed { slot: usize, reason: String },

    #[error("the supervisor is shutting down")]
    ShuttingDown,

    /// Refused before reaching the worker, which stays in service.
    #[error("request of {len} bytes does not fit in a {max} byte worker frame")]
    RequestTooLarge { len: usize, max: usize },

    #[error("request could not be encoded for the worker: {0}")]
    Unencodable(String),
}

pub(crate) type StatusReply = oneshot::Sender<StatusReport>;

#[derive(Debug)]
pub(crate) enum Command {
    Dispatch {
        request: WorkerRequest,
        reply: oneshot::Sender<std::result::Result<WorkerResponse, DispatchError>>,
    },
    Status {
        filter: Option<StatusFilter>,
        reply: StatusReply,
    },
    Reload {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Acknowledged before draining begins.
    Stop { reply: oneshot::Sender<()> },
}

/// Cloneable handle to a running supervisor.
///
/// The HTTP server, the admin socket and the file watcher each hold one.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
}

impl SupervisorHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, phase: watch::Receiver<Phase>) -> Self {
        Self { commands, phase }
    }

    /// Route one request to a worker and wait for its response.
    pub async fn dispatch(
        &self,
        request: WorkerRequest,
    ) -> std::result::Result<WorkerResponse, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Dispatch { request, reply })
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;
        rx.await.unwrap_or(Err(DispatchError::ShuttingDown))
    }

    pub async fn status(&self, filter: Option<StatusFilter>) -> Result<StatusReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { filter, reply }).await?;
        rx.await.map_err(|_| WarmpoolError::ShuttingDown)
    }

    /// Start a rolling reload. Returns once it has been accepted.
    pub async fn reload(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reload { reply }).await?;
        rx.await.map_err(|_| WarmpoolError::ShuttingDown)?
    }

    /// Ask the supervisor to drain and stop. Stopping twice is fine.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stop { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Resolve once the phase is at least `target`.
    pub async fn wait_for_phase(&self, target: Phase) -> Phase {
        let mut rx = self.phase.clone();
        match rx.wait_for(|phase| *phase >= target).await {
            Ok(phase) => *phase,
            // The supervisor is gone; that is as stopped as it gets.
            Err(_) => Phase::Stopped,
        }
    }

    /// Resolve when every worker is ready, or fail if startup was abandoned.
    pub async fn wait_until_running(&self) -> Result<()> {
        match self.wait_for_phase(Phase::Running).await {
            Phase::Running => Ok(()),
            _ => Err(WarmpoolError::ShuttingDown),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WarmpoolError::ShuttingDown)
    }
}
