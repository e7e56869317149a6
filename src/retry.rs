//! Retry and poll schedules.
//!
//! Both are pure: they compute delays and the caller does the sleeping, so
//! the same policy can be driven by real or paused time.

use std::time::Duration;

/// Bounded exponential backoff for transient remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Attempts allowed after the first failure
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

/// Schedule for checking an asynchronous remote result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Checks allowed in total
    pub max_attempts: u32,
    /// Total time allowed across all waits
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(30),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(120),
            max_attempts: 20,
            max_wait: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    /// Wait after check number `attempt` (0-based) before the next one.
    pub fn interval(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(64) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
