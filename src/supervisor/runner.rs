//! The supervisor loop.
//!
//! One task owns the [`WorkerPool`] and the dispatch queue. Everything that
//! changes either arrives as a message: commands from handles, events from
//! worker connection tasks, or timers. Nothing else touches pool state, so
//! there are no locks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command::{Command, DispatchError, Phase, SupervisorHandle};
use crate::control::{PoolSummary, StatusFilter, StatusReport, WorkerRequest, WorkerResponse};
use crate::error::{Result, WarmpoolError};
use crate::settings::Settings;
use crate::worker::WorkerLauncher;
use crate::worker::conn::{PoolEvent, sleep_or_pending};
use crate::worker::pool::WorkerPool;

/// How often idle slots are checked against ttl and memory-limit.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Pending commands before `dispatch` callers feel backpressure.
const COMMAND_BUFFER: usize = 1024;

type DispatchReply = oneshot::Sender<std::result::Result<WorkerResponse, DispatchError>>;

/// A request waiting for a free worker.
struct Queued {
    request: WorkerRequest,
    reply: DispatchReply,
    deadline: Instant,
}

pub struct Supervisor {
    settings: Arc<Settings>,
    pool: WorkerPool,
    phase: watch::Sender<Phase>,
    commands: mpsc::Receiver<Command>,
    commands_closed: bool,
    events: mpsc::UnboundedReceiver<PoolEvent>,
    queue: VecDeque<Queued>,
    started_at: Instant,
}

impl Supervisor {
    pub fn new(
        settings: Arc<Settings>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> (Self, SupervisorHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (phase, phase_rx) = watch::channel(Phase::Starting);

        let supervisor = Self {
            pool: WorkerPool::new(Arc::clone(&settings), launcher, event_tx),
            settings,
            phase,
            commands,
            commands_closed: false,
            events,
            queue: VecDeque::new(),
            started_at: Instant::now(),
        };
        (supervisor, SupervisorHandle::new(command_tx, phase_rx))
    }

    /// Run until stopped. An error means startup or respawning failed for good.
    pub async fn run(mut self) -> Result<()> {
        info!(workers = self.pool.len(), "Starting worker pool");
        self.started_at = Instant::now();
        self.pool.spawn_all(self.started_at);

        let result = self.event_loop().await;
        if let Err(ref e) = result {
            error!(error = %e, "Supervisor failed, stopping workers");
            self.abort().await;
        }

        self.fail_queued(DispatchError::ShuttingDown);
        self.set_phase(Phase::Stopped);
        info!("Supervisor stopped");
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        let mut maintenance = tokio::time::interval(MAINTENANCE_INTERVAL);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                command = self.commands.recv(), if !self.commands_closed => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All supervisor handles dropped, stopping");
                        self.commands_closed = true;
                        self.begin_shutdown(Instant::now());
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event)?,
                _ = maintenance.tick() => self.maintain(Instant::now()),
                _ = sleep_or_pending(deadline) => self.expire(Instant::now()),
            }

            if self.phase() == Phase::Draining && self.pool.all_terminated() {
                return Ok(());
            }
        }
    }

    /// Kill whatever is left after a fatal error and wait for the exits.
    async fn abort(&mut self) {
        self.set_phase(Phase::Draining);
        self.pool.shutdown_all(Instant::now());
        while !self.pool.all_terminated() {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(event) = self.events.recv() => {
                    let _ = self.pool.handle_event(event, Instant::now());
                }
                _ = sleep_or_pending(deadline) => self.pool.expire(Instant::now()),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Dispatch { request, reply } => self.dispatch(request, reply, now),
            Command::Status { filter, reply } => {
                let _ = reply.send(self.status(filter, now));
            }
            Command::Reload { reply } => {
                let result = match self.phase() {
                    Phase::Running => {
                        self.pool.recycle_all(now);
                        Ok(())
                    }
                    Phase::Starting => Err(WarmpoolError::Rejected(
                        "workers are still starting".into(),
                    )),
                    Phase::Draining | Phase::Stopped => Err(WarmpoolError::ShuttingDown),
                };
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let _ = reply.send(());
                self.begin_shutdown(now);
            }
        }
    }

    fn handle_event(&mut self, event: PoolEvent) -> Result<()> {
        let now = Instant::now();
        self.pool.handle_event(event, now)?;

        if self.phase() == Phase::Starting && self.pool.all_ready() {
            info!(
                workers = self.pool.len(),
                startup_ms = now.duration_since(self.started_at).as_millis() as u64,
                "All workers ready"
            );
            self.set_phase(Phase::Running);
        }

        self.pump_queue(now);
        Ok(())
    }

    fn dispatch(&mut self, request: WorkerRequest, reply: DispatchReply, now: Instant) {
        if self.phase() >= Phase::Draining {
            let _ = reply.send(Err(DispatchError::ShuttingDown));
            return;
        }

        // Queued requests go first
        if self.queue.is_empty()
            && let Some(id) = self.pool.select_worker()
        {
            self.pool.dispatch(id, request, reply);
            return;
        }

        if self.queue.len() >= self.settings.queue_capacity {
            debug!(queued = self.queue.len(), "Dispatch queue full");
            let _ = reply.send(Err(DispatchError::Unavailable));
            return;
        }

        self.queue.push_back(Queued {
            request,
            reply,
            deadline: now + self.settings.queue_timeout(),
        });
    }

    /// Hand queued requests to whichever workers are free.
    fn pump_queue(&mut self, now: Instant) {
        self.expire_queue(now);
        while let Some(front) = self.queue.front() {
            if front.reply.is_closed() {
                // Client went away while waiting
                self.queue.pop_front();
                continue;
            }
            let Some(id) = self.pool.select_worker() else {
                break;
            };
            if let Some(queued) = self.queue.pop_front() {
                self.pool.dispatch(id, queued.request, queued.reply);
            }
        }
    }

    fn expire_queue(&mut self, now: Instant) {
        while self.queue.front().is_some_and(|q| q.deadline <= now) {
            if let Some(expired) = self.queue.pop_front() {
                let _ = expired.reply.send(Err(DispatchError::Unavailable));
            }
        }
    }

    fn fail_queued(&mut self, error: DispatchError) {
        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(Err(error.clone()));
        }
    }

    fn begin_shutdown(&mut self, now: Instant) {
        if self.phase() >= Phase::Draining {
            return;
        }
        info!(queued = self.queue.len(), "Stopping, draining workers");
        self.set_phase(Phase::Draining);
        self.fail_queued(DispatchError::ShuttingDown);
        self.pool.shutdown_all(now);
    }

    fn maintain(&mut self, now: Instant) {
        if self.phase() != Phase::Running {
            return;
        }
        for id in 0..self.pool.len() {
            self.pool.recycle_if_due(id, now);
        }
    }

    fn expire(&mut self, now: Instant) {
        self.pool.expire(now);
        self.pump_queue(now);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let queued = self.queue.front().map(|q| q.deadline);
        match (self.pool.next_deadline(), queued) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn status(&self, filter: Option<StatusFilter>, now: Instant) -> StatusReport {
        let counts = self.pool.counts();
        let workers = self
            .pool
            .status(now)
            .into_iter()
            .filter(|w| filter.as_ref().is_none_or(|f| f.matches(w)))
            .collect();

        StatusReport {
            workers,
            summary: PoolSummary {
                phase: self.phase(),
                total: self.pool.len(),
                spawning: counts.spawning,
                ready: counts.ready,
                busy: counts.busy,
                draining: counts.draining,
                terminated: counts.terminated,
                queued: self.queue.len(),
                reloading: self.pool.is_reloading(),
                total_requests: self.pool.total_requests(),
                total_restarts: self.pool.total_restarts(),
                uptime_seconds: now.duration_since(self.started_at).as_secs(),
            },
        }
    }

    fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "Supervisor phase changed");
        }
        if phase == Phase::Stopped && !self.pool.all_terminated() {
            warn!("Supervisor stopped with workers still running");
        }
    }
}
