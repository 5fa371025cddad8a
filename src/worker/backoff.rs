//! Respawn delays for crash loops and failed spawns.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`. Workers
//! are local processes competing for nothing but CPU, so there is no jitter.

use std::time::Duration;

use tokio::time::Instant;

/// Crashes further apart than this are not a loop.
pub const CRASH_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Consecutive-crash bookkeeping for one slot.
#[derive(Debug, Clone, Default)]
pub struct CrashTracker {
    streak: u32,
    last: Option<Instant>,
}

impl CrashTracker {
    /// Record a crash at `now` and return the current streak length.
    ///
    /// A crash outside [`CRASH_WINDOW`] of the previous one starts a new streak.
    pub fn record(&mut self, now: Instant) -> u32 {
        let in_window = self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) < CRASH_WINDOW);
        self.streak = if in_window { self.streak + 1 } else { 1 };
        self.last = Some(now);
        self.streak
    }

    /// How long to wait before respawning after the crash just recorded.
    ///
    /// The first crash in a streak respawns immediately.
    pub fn delay(&self, policy: &BackoffPolicy) -> Option<Duration> {
        match self.streak {
            0 | 1 => None,
            n => Some(policy.next(n - 2)),
        }
    }

    /// A request was served successfully; the loop is broken.
    pub fn reset(&mut self) {
        self.streak = 0;
        self.last = None;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
