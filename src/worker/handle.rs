//! Per-slot bookkeeping.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::backoff::CrashTracker;
use super::conn::WorkerLink;
use crate::control::WorkerStatus;

/// Lifecycle state of a worker slot.
///
/// ```text
/// Spawning ──READY──▶ Ready ──dispatch──▶ Busy
///     ▲                 ▲  ◀──RESULT───────┘
///     │                 └──▶ Draining ──exit──▶ Terminated ──respawn──┐
///     └───────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Spawning,
    Ready,
    Busy,
    Draining,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spawning" => Ok(Self::Spawning),
            "ready" => Ok(Self::Ready),
            "busy" => Ok(Self::Busy),
            "draining" => Ok(Self::Draining),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown worker state: {}", other)),
        }
    }
}

/// The pool's record of one slot and its current incarnation.
///
/// A slot keeps its id for the life of the supervisor; the process behind it
/// changes with every respawn.
#[derive(Debug)]
pub struct WorkerHandle {
    pub(crate) id: usize,
    pub(crate) state: WorkerState,
    pub(crate) pid: Option<u32>,
    /// Identifies the current process; events from older ones are ignored.
    pub(crate) incarnation: u64,
    pub(crate) link: Option<WorkerLink>,
    /// Requests served by the current incarnation.
    pub(crate) requests_served: u64,
    /// Requests served by every incarnation of this slot.
    pub(crate) lifetime_requests: u64,
    pub(crate) restarts: u64,
    pub(crate) spawned_at: Instant,
    pub(crate) in_flight: bool,
    /// A STOP or kill has been issued; the coming exit is expected.
    pub(crate) stopping: bool,
    /// When a draining slot with a request in flight gets killed.
    pub(crate) drain_deadline: Option<Instant>,
    pub(crate) respawn_at: Option<Instant>,
    pub(crate) failed_spawns: u32,
    pub(crate) crashes: CrashTracker,
}

impl WorkerHandle {
    pub(crate) fn new(id: usize, now: Instant) -> Self {
        Self {
            id,
            state: WorkerState::Terminated,
            pid: None,
            incarnation: 0,
            link: None,
            requests_served: 0,
            lifetime_requests: 0,
            restarts: 0,
            spawned_at: now,
            in_flight: false,
            stopping: false,
            drain_deadline: None,
            respawn_at: None,
            failed_spawns: 0,
            crashes: CrashTracker::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.spawned_at)
    }

    /// Reset for a freshly launched incarnation.
    pub(crate) fn begin_incarnation(&mut self, incarnation: u64, link: WorkerLink, now: Instant) {
        if self.incarnation != 0 {
            self.restarts += 1;
        }
        self.state = WorkerState::Spawning;
        self.incarnation = incarnation;
        self.link = Some(link);
        self.pid = None;
        self.requests_served = 0;
        self.spawned_at = now;
        self.in_flight = false;
        self.stopping = false;
        self.drain_deadline = None;
        self.respawn_at = None;
    }

    pub(crate) fn mark_ready(&mut self, pid: u32) {
        self.state = WorkerState::Ready;
        self.pid = Some(pid);
        self.failed_spawns = 0;
    }

    pub(crate) fn mark_terminated(&mut self) {
        self.state = WorkerState::Terminated;
        self.link = None;
        self.pid = None;
        self.in_flight = false;
        self.stopping = false;
        self.drain_deadline = None;
    }

    pub(crate) fn finish_request(&mut self) {
        self.in_flight = false;
        self.requests_served += 1;
        self.lifetime_requests += 1;
        self.crashes.reset();
    }

    pub fn status(&self, now: Instant) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            pid: self.pid,
            state: self.state,
            requests_served: self.requests_served,
            age_seconds: match self.state {
                WorkerState::Terminated => 0,
                _ => self.age(now).as_secs(),
            },
        }
    }
}
