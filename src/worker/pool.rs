//! The worker pool: slot table, selection, recycling and respawn policy.
//!
//! The pool is owned by the supervisor loop and is never shared. It does no
//! I/O itself: connection tasks do the talking and report back through
//! [`PoolEvent`]s, which the supervisor feeds into [`WorkerPool::handle_event`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::conn::{self, DispatchReply, Incarnation, PoolEvent, WorkerCommand};
use super::handle::{WorkerHandle, WorkerState};
use super::proc;
use super::spawn::{LaunchSpec, WorkerLauncher};
use crate::control::{WorkerRequest, WorkerStatus};
use crate::error::{Result, WarmpoolError};
use crate::memory::MemorySize;
use crate::paths;
use crate::settings::Settings;
use crate::supervisor::DispatchError;

/// Why a slot is being cycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    MaxRequests(u64),
    Ttl,
    MemoryLimit(MemorySize),
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxRequests(n) => write!(f, "served {} requests", n),
            Self::Ttl => f.write_str("ttl expired"),
            Self::MemoryLimit(rss) => write!(f, "resident memory {} over limit", rss),
        }
    }
}

/// Slot counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub spawning: usize,
    pub ready: usize,
    pub busy: usize,
    pub draining: usize,
    pub terminated: usize,
}

pub struct WorkerPool {
    slots: Vec<WorkerHandle>,
    /// Slot after the one that received the last request.
    cursor: usize,
    settings: Arc<Settings>,
    launcher: Arc<dyn WorkerLauncher>,
    events: mpsc::UnboundedSender<PoolEvent>,
    backoff: BackoffPolicy,
    next_incarnation: u64,
    /// Slots still waiting for their turn in a rolling reload.
    reload_queue: VecDeque<usize>,
    /// Slot currently cycling, and the incarnation it must get past.
    reloading: Option<(usize, u64)>,
    shutting_down: bool,
}

impl WorkerPool {
    pub(crate) fn new(
        settings: Arc<Settings>,
        launcher: Arc<dyn WorkerLauncher>,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        let now = Instant::now();
        let slots = (0..settings.workers)
            .map(|id| WorkerHandle::new(id, now))
            .collect();
        Self {
            slots,
            cursor: 0,
            settings,
            launcher,
            events,
            backoff: BackoffPolicy::default(),
            next_incarnation: 1,
            reload_queue: VecDeque::new(),
            reloading: None,
            shutting_down: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: usize) -> Option<&WorkerHandle> {
        self.slots.get(id)
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.is_some() || !self.reload_queue.is_empty()
    }

    /// Launch a fresh incarnation into slot `id`.
    pub fn spawn(&mut self, id: usize, now: Instant) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };

        let incarnation = self.next_incarnation;
        self.next_incarnation += 1;

        let (link, commands) = mpsc::unbounded_channel();
        slot.begin_incarnation(incarnation, link, now);

        let spec = LaunchSpec {
            id,
            socket: paths::worker_socket(&self.settings.socket_path, id),
            bootstrap: self.settings.bootstrap.clone(),
            app_env: self.settings.app_env.clone(),
            debug: self.settings.debug,
        };
        debug!(worker_id = id, incarnation, "Spawning worker");

        conn::spawn(Incarnation {
            spec,
            incarnation,
            launcher: Arc::clone(&self.launcher),
            startup_timeout: self.settings.startup_timeout(),
            max_execution_time: self.settings.max_execution_time(),
            commands,
            events: self.events.clone(),
        });
    }

    pub fn spawn_all(&mut self, now: Instant) {
        for id in 0..self.slots.len() {
            self.spawn(id, now);
        }
    }

    /// Next Ready slot in round-robin order, without claiming it.
    pub fn select_worker(&mut self) -> Option<usize> {
        let n = self.slots.len();
        let id = (0..n)
            .map(|offset| (self.cursor + offset) % n)
            .find(|&id| self.slots[id].state == WorkerState::Ready)?;
        self.cursor = (id + 1) % n;
        Some(id)
    }

    /// Ready to Busy. Anything else is a bookkeeping error.
    pub fn mark_busy(&mut self, id: usize) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.state != WorkerState::Ready {
            return Err(WarmpoolError::Worker(format!(
                "worker {} is {}, not ready",
                id, slot.state
            )));
        }
        slot.state = WorkerState::Busy;
        slot.in_flight = true;
        Ok(())
    }

    /// Busy to Ready after a completed request.
    pub fn mark_idle(&mut self, id: usize) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.state != WorkerState::Busy {
            return Err(WarmpoolError::Worker(format!(
                "worker {} is {}, not busy",
                id, slot.state
            )));
        }
        slot.finish_request();
        slot.state = WorkerState::Ready;
        Ok(())
    }

    /// Claim slot `id` and hand it the request. The reply is always answered.
    pub(crate) fn dispatch(&mut self, id: usize, request: WorkerRequest, reply: DispatchReply) {
        if let Err(e) = self.mark_busy(id) {
            warn!(worker_id = id, error = %e, "Dispatch to a worker that cannot take it");
            let _ = reply.send(Err(DispatchError::Unavailable));
            return;
        }

        let slot = &mut self.slots[id];
        let command = WorkerCommand::Dispatch { request, reply };
        let undelivered = match slot.link.as_ref() {
            Some(link) => link.send(command).err().map(|e| e.0),
            None => Some(command),
        };
        if let Some(WorkerCommand::Dispatch { reply, .. }) = undelivered {
            let _ = reply.send(Err(DispatchError::WorkerCrashed {
                slot: id,
                reason: "connection task is gone".into(),
            }));
        }
    }

    /// Start draining slot `id` if it hit a recycling limit.
    pub fn recycle_if_due(&mut self, id: usize, now: Instant) -> Option<RecycleReason> {
        let slot = self.slots.get(id)?;
        if !matches!(slot.state, WorkerState::Ready | WorkerState::Busy) || self.shutting_down {
            return None;
        }

        let reason = if let Some(max) = self.settings.max_requests()
            && slot.requests_served >= max
        {
            RecycleReason::MaxRequests(slot.requests_served)
        } else if let Some(ttl) = self.settings.ttl()
            && slot.age(now) >= ttl
        {
            RecycleReason::Ttl
        } else if let Some(limit) = self.settings.memory_limit()
            && let Some(rss) = slot.pid.and_then(proc::resident_memory)
            && rss > limit
        {
            RecycleReason::MemoryLimit(rss)
        } else {
            return None;
        };

        info!(worker_id = id, reason = %reason, "Recycling worker");
        self.begin_drain(id, now);
        Some(reason)
    }

    /// Stop accepting requests on slot `id` and stop it once idle.
    pub fn begin_drain(&mut self, id: usize, now: Instant) {
        let reload_timeout = self.settings.reload_timeout();
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        match slot.state {
            WorkerState::Ready => {
                slot.state = WorkerState::Draining;
                self.stop_slot(id, now);
            }
            WorkerState::Busy => {
                slot.state = WorkerState::Draining;
                slot.drain_deadline = Some(now + reload_timeout);
                debug!(worker_id = id, "Draining after in-flight request");
            }
            WorkerState::Spawning => self.force_kill(id),
            WorkerState::Draining | WorkerState::Terminated => {}
        }
    }

    /// Send STOP to an idle slot.
    fn stop_slot(&mut self, id: usize, now: Instant) {
        let reload_timeout = self.settings.reload_timeout();
        let slot = &mut self.slots[id];
        let deadline = slot.drain_deadline.take().unwrap_or(now + reload_timeout);
        slot.state = WorkerState::Draining;
        slot.stopping = true;
        if let Some(link) = slot.link.as_ref() {
            // A closed link means the task already ended; its Exited is queued.
            let _ = link.send(WorkerCommand::Stop { deadline });
        }
    }

    fn force_kill(&mut self, id: usize) {
        let slot = &mut self.slots[id];
        slot.stopping = true;
        if let Some(link) = slot.link.as_ref() {
            let _ = link.send(WorkerCommand::Kill);
        }
    }

    /// Cycle every slot to a new incarnation, one at a time.
    pub fn recycle_all(&mut self, now: Instant) {
        if self.shutting_down {
            return;
        }
        for id in 0..self.slots.len() {
            if !self.reload_queue.contains(&id) {
                self.reload_queue.push_back(id);
            }
        }
        info!(workers = self.slots.len(), "Starting rolling reload");
        if self.reloading.is_none() {
            self.advance_reload(now);
        }
    }

    fn advance_reload(&mut self, now: Instant) {
        let Some(id) = self.reload_queue.pop_front() else {
            self.reloading = None;
            info!("Rolling reload complete");
            return;
        };

        let slot = &self.slots[id];
        let threshold = match slot.state {
            // Started before the reload was requested.
            WorkerState::Spawning => slot.incarnation.saturating_sub(1),
            WorkerState::Ready | WorkerState::Busy => {
                let current = slot.incarnation;
                self.begin_drain(id, now);
                current
            }
            WorkerState::Draining | WorkerState::Terminated => slot.incarnation,
        };
        debug!(worker_id = id, "Reloading worker");
        self.reloading = Some((id, threshold));
    }

    /// Drain every slot and stop respawning.
    pub fn shutdown_all(&mut self, now: Instant) {
        self.shutting_down = true;
        self.reload_queue.clear();
        self.reloading = None;

        for id in 0..self.slots.len() {
            match self.slots[id].state {
                WorkerState::Terminated => self.slots[id].respawn_at = None,
                _ => self.begin_drain(id, now),
            }
        }
    }

    pub fn all_ready(&self) -> bool {
        self.slots.iter().all(|s| s.state == WorkerState::Ready)
    }

    pub fn all_terminated(&self) -> bool {
        self.slots.iter().all(|s| s.state == WorkerState::Terminated)
    }

    /// Apply an event from a connection task.
    ///
    /// Errors only when a slot has used up its spawn attempts.
    pub(crate) fn handle_event(&mut self, event: PoolEvent, now: Instant) -> Result<()> {
        match event {
            PoolEvent::Ready {
                id,
                incarnation,
                pid,
            } => {
                let Some(slot) = self.current_mut(id, incarnation) else {
                    return Ok(());
                };
                slot.mark_ready(pid);
                info!(worker_id = id, pid, incarnation, "Worker ready");

                if self.shutting_down {
                    self.begin_drain(id, now);
                } else if let Some((reloading, threshold)) = self.reloading
                    && reloading == id
                    && incarnation > threshold
                {
                    self.advance_reload(now);
                }
            }

            PoolEvent::Completed { id, incarnation } => {
                let Some(slot) = self.current_mut(id, incarnation) else {
                    return Ok(());
                };
                match slot.state {
                    WorkerState::Busy => {
                        self.mark_idle(id)?;
                        self.recycle_if_due(id, now);
                    }
                    WorkerState::Draining => {
                        slot.finish_request();
                        self.stop_slot(id, now);
                    }
                    _ => slot.finish_request(),
                }
            }

            PoolEvent::Released { id, incarnation } => {
                let Some(slot) = self.current_mut(id, incarnation) else {
                    return Ok(());
                };
                slot.in_flight = false;
                match slot.state {
                    WorkerState::Busy => slot.state = WorkerState::Ready,
                    WorkerState::Draining => self.stop_slot(id, now),
                    _ => {}
                }
            }

            PoolEvent::SpawnFailed {
                id,
                incarnation,
                reason,
            } => {
                let attempts = self.settings.spawn_attempts;
                let shutting_down = self.shutting_down;
                let backoff = self.backoff;
                let Some(slot) = self.current_mut(id, incarnation) else {
                    return Ok(());
                };
                slot.mark_terminated();
                slot.failed_spawns += 1;
                if shutting_down {
                    return Ok(());
                }

                if slot.failed_spawns >= attempts {
                    error!(worker_id = id, attempts, reason = %reason, "Giving up on worker");
                    return Err(WarmpoolError::StartupFailure {
                        slot: id,
                        attempts,
                        reason,
                    });
                }

                let delay = backoff.next(slot.failed_spawns - 1);
                warn!(
                    worker_id = id,
                    attempt = slot.failed_spawns,
                    retry_in_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Worker failed to start"
                );
                slot.respawn_at = Some(now + delay);
            }

            PoolEvent::Exited {
                id,
                incarnation,
                reason,
            } => {
                let shutting_down = self.shutting_down;
                let backoff = self.backoff;
                let Some(slot) = self.current_mut(id, incarnation) else {
                    return Ok(());
                };
                let expected = slot.stopping || slot.state == WorkerState::Draining;
                let pid = slot.pid;
                slot.mark_terminated();

                if shutting_down {
                    info!(worker_id = id, ?pid, reason = %reason, "Worker stopped");
                    return Ok(());
                }
                if expected {
                    debug!(worker_id = id, ?pid, reason = %reason, "Worker retired");
                    self.spawn(id, now);
                    return Ok(());
                }

                warn!(worker_id = id, ?pid, reason = %reason, "Worker exited unexpectedly");
                let delay = if reason.counts_as_crash() {
                    slot.crashes.record(now);
                    slot.crashes.delay(&backoff)
                } else {
                    None
                };
                match delay {
                    Some(delay) => {
                        info!(
                            worker_id = id,
                            crashes = slot.crashes.streak(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Worker is crash-looping, delaying respawn"
                        );
                        slot.respawn_at = Some(now + delay);
                    }
                    None => self.spawn(id, now),
                }
            }
        }
        Ok(())
    }

    /// Enforce drain deadlines and run due respawns.
    pub fn expire(&mut self, now: Instant) {
        for id in 0..self.slots.len() {
            let slot = &mut self.slots[id];

            if slot.state == WorkerState::Draining
                && slot.in_flight
                && slot.drain_deadline.is_some_and(|d| d <= now)
            {
                slot.drain_deadline = None;
                warn!(worker_id = id, "Drain deadline passed, killing worker");
                self.force_kill(id);
                continue;
            }

            if slot.respawn_at.is_some_and(|at| at <= now) {
                slot.respawn_at = None;
                if !self.shutting_down {
                    self.spawn(id, now);
                }
            }
        }
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .flat_map(|s| {
                let drain = s.drain_deadline.filter(|_| s.in_flight);
                [drain, s.respawn_at]
            })
            .flatten()
            .min()
    }

    pub fn status(&self, now: Instant) -> Vec<WorkerStatus> {
        self.slots.iter().map(|s| s.status(now)).collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for slot in &self.slots {
            match slot.state {
                WorkerState::Spawning => counts.spawning += 1,
                WorkerState::Ready => counts.ready += 1,
                WorkerState::Busy => counts.busy += 1,
                WorkerState::Draining => counts.draining += 1,
                WorkerState::Terminated => counts.terminated += 1,
            }
        }
        counts
    }

    pub fn total_requests(&self) -> u64 {
        self.slots.iter().map(|s| s.lifetime_requests).sum()
    }

    pub fn total_restarts(&self) -> u64 {
        self.slots.iter().map(|s| s.restarts).sum()
    }

    fn slot_mut(&mut self, id: usize) -> Result<&mut WorkerHandle> {
        self.slots
            .get_mut(id)
            .ok_or_else(|| WarmpoolError::Worker(format!("no worker slot {}", id)))
    }

    /// Slot `id`, if `incarnation` is still the one running in it.
    fn current_mut(&mut self, id: usize, incarnation: u64) -> Option<&mut WorkerHandle> {
        let slot = self.slots.get_mut(id)?;
        if slot.incarnation == incarnation {
            Some(slot)
        } else {
            debug!(worker_id = id, incarnation, "Ignoring event from a previous incarnation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::proc::{BoxFuture, WorkerProcess};
    use crate::worker::signals::TerminationReason;
    use std::time::Duration;

    /// Launcher whose processes never start; tests drive the pool with
    /// hand-written events instead.
    struct InertLauncher;

    struct InertProcess;

    impl WorkerProcess for InertProcess {
        fn pid(&self) -> Option<u32> {
            None
        }
        fn wait(&mut self) -> BoxFuture<'_, TerminationReason> {
            Box::pin(std::future::pending())
        }
        fn terminate(&mut self) {}
        fn kill(&mut self) -> BoxFuture<'_, TerminationReason> {
            Box::pin(async { TerminationReason::ForceKilled })
        }
    }

    impl WorkerLauncher for InertLauncher {
        fn launch(&self, _spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
            Ok(Box::new(InertProcess))
        }
    }

    fn pool(workers: usize, tweak: impl FnOnce(&mut Settings)) -> (WorkerPool, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings {
            workers,
            socket_path: dir.path().to_path_buf(),
            ..Settings::default()
        };
        tweak(&mut settings);
        let (events, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(Arc::new(settings), Arc::new(InertLauncher), events);
        (pool, dir)
    }

    fn ready_all(pool: &mut WorkerPool, now: Instant) {
        pool.spawn_all(now);
        for id in 0..pool.len() {
            let incarnation = pool.slots[id].incarnation;
            pool.handle_event(
                PoolEvent::Ready {
                    id,
                    incarnation,
                    pid: 10_000 + id as u32,
                },
                now,
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_round_robin_selection() {
        let (mut pool, _dir) = pool(3, |_| {});
        let now = Instant::now();
        ready_all(&mut pool, now);

        assert_eq!(pool.select_worker(), Some(0));
        assert_eq!(pool.select_worker(), Some(1));
        pool.mark_busy(2).unwrap();
        assert_eq!(pool.select_worker(), Some(0));
        pool.mark_busy(0).unwrap();
        pool.mark_busy(1).unwrap();
        assert_eq!(pool.select_worker(), None);
    }

    #[tokio::test]
    async fn test_busy_idle_transitions() {
        let (mut pool, _dir) = pool(1, |_| {});
        let now = Instant::now();
        ready_all(&mut pool, now);

        assert!(pool.mark_idle(0).is_err());
        pool.mark_busy(0).unwrap();
        assert!(pool.mark_busy(0).is_err());
        pool.mark_idle(0).unwrap();
        assert_eq!(pool.slot(0).unwrap().requests_served(), 1);
        assert!(pool.mark_busy(7).is_err());
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (mut pool, _dir) = pool(1, |_| {});
        let now = Instant::now();
        ready_all(&mut pool, now);

        pool.handle_event(
            PoolEvent::Exited {
                id: 0,
                incarnation: 999,
                reason: TerminationReason::Exited(1),
            },
            now,
        )
        .unwrap();
        assert_eq!(pool.slot(0).unwrap().state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_released_dispatch_frees_worker_without_counting() {
        let (mut pool, _dir) = pool(1, |s| s.max_requests = 1);
        let now = Instant::now();
        ready_all(&mut pool, now);
        let incarnation = pool.slots[0].incarnation;

        pool.mark_busy(0).unwrap();
        pool.handle_event(PoolEvent::Released { id: 0, incarnation }, now)
            .unwrap();

        let slot = pool.slot(0).unwrap();
        assert_eq!(slot.state(), WorkerState::Ready);
        assert_eq!(slot.requests_served(), 0);
        assert_eq!(slot.restarts(), 0);
        assert_eq!(pool.select_worker(), Some(0));
    }

    #[tokio::test]
    async fn test_max_requests_triggers_drain() {
        let (mut pool, _dir) = pool(1, |s| s.max_requests = 2);
        let now = Instant::now();
        ready_all(&mut pool, now);
        let incarnation = pool.slots[0].incarnation;

        for _ in 0..2 {
            pool.mark_busy(0).unwrap();
            pool.handle_event(PoolEvent::Completed { id: 0, incarnation }, now)
                .unwrap();
        }
        assert_eq!(pool.slot(0).unwrap().state(), WorkerState::Draining);

        pool.handle_event(
            PoolEvent::Exited {
                id: 0,
                incarnation,
                reason: TerminationReason::Exited(0),
            },
            now,
        )
        .unwrap();
        let slot = pool.slot(0).unwrap();
        assert_eq!(slot.state(), WorkerState::Spawning);
        assert!(slot.incarnation() > incarnation);
        assert_eq!(slot.restarts(), 1);
    }

    #[tokio::test]
    async fn test_ttl_triggers_drain() {
        let (mut pool, _dir) = pool(1, |s| s.ttl = 10);
        let now = Instant::now();
        ready_all(&mut pool, now);

        assert_eq!(pool.recycle_if_due(0, now + Duration::from_secs(5)), None);
        assert_eq!(
            pool.recycle_if_due(0, now + Duration::from_secs(11)),
            Some(RecycleReason::Ttl)
        );
    }

    #[tokio::test]
    async fn test_repeated_crashes_back_off() {
        let (mut pool, _dir) = pool(1, |_| {});
        let now = Instant::now();
        ready_all(&mut pool, now);

        let crash = |pool: &mut WorkerPool| {
            let incarnation = pool.slots[0].incarnation;
            pool.handle_event(
                PoolEvent::Exited {
                    id: 0,
                    incarnation,
                    reason: TerminationReason::Exited(1),
                },
                now,
            )
            .unwrap();
        };

        crash(&mut pool);
        assert_eq!(pool.slot(0).unwrap().state(), WorkerState::Spawning);

        crash(&mut pool);
        let slot = pool.slot(0).unwrap();
        assert_eq!(slot.state(), WorkerState::Terminated);
        assert_eq!(slot.respawn_at, Some(now + Duration::from_millis(100)));
        assert_eq!(pool.next_deadline(), slot.respawn_at);

        pool.expire(now + Duration::from_millis(100));
        assert_eq!(pool.slot(0).unwrap().state(), WorkerState::Spawning);
    }

    #[tokio::test]
    async fn test_spawn_attempts_exhausted_is_fatal() {
        let (mut pool, _dir) = pool(1, |s| s.spawn_attempts = 2);
        let now = Instant::now();
        pool.spawn_all(now);

        let fail = |pool: &mut WorkerPool| {
            let incarnation = pool.slots[0].incarnation;
            pool.handle_event(
                PoolEvent::SpawnFailed {
                    id: 0,
                    incarnation,
                    reason: "exec format error".into(),
                },
                now,
            )
        };

        fail(&mut pool).unwrap();
        pool.expire(now + Duration::from_secs(1));
        let err = fail(&mut pool).unwrap_err();
        assert!(matches!(
            err,
            WarmpoolError::StartupFailure { slot: 0, attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_rolling_reload_goes_one_slot_at_a_time() {
        let (mut pool, _dir) = pool(3, |_| {});
        let now = Instant::now();
        ready_all(&mut pool, now);

        pool.recycle_all(now);
        assert!(pool.is_reloading());
        assert_eq!(pool.counts().draining, 1);
        assert_eq!(pool.counts().ready, 2);

        for id in 0..3 {
            assert_eq!(pool.slot(id).unwrap().state(), WorkerState::Draining);
            let old = pool.slots[id].incarnation;
            pool.handle_event(
                PoolEvent::Exited {
                    id,
                    incarnation: old,
                    reason: TerminationReason::Exited(0),
                },
                now,
            )
            .unwrap();
            let new = pool.slots[id].incarnation;
            pool.handle_event(
                PoolEvent::Ready {
                    id,
                    incarnation: new,
                    pid: 20_000 + id as u32,
                },
                now,
            )
            .unwrap();
        }

        assert!(!pool.is_reloading());
        assert!(pool.all_ready());
        assert_eq!(pool.total_restarts(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_drains_busy_slots_with_deadline() {
        let (mut pool, _dir) = pool(2, |s| s.reload_timeout = 5);
        let now = Instant::now();
        ready_all(&mut pool, now);
        pool.mark_busy(1).unwrap();

        pool.shutdown_all(now);
        assert_eq!(pool.counts().draining, 2);
        assert_eq!(pool.next_deadline(), Some(now + Duration::from_secs(5)));

        pool.expire(now + Duration::from_secs(5));
        assert!(pool.slot(1).unwrap().stopping);

        for id in 0..2 {
            let incarnation = pool.slots[id].incarnation;
            pool.handle_event(
                PoolEvent::Exited {
                    id,
                    incarnation,
                    reason: TerminationReason::ForceKilled,
                },
                now,
            )
            .unwrap();
        }
        assert!(pool.all_terminated());
    }
}
