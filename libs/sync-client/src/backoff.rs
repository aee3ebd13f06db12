//! Fixed-interval reconnect policy with a bounded attempt count

use std::time::Duration;

/// What to do after a failed connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Attempts exhausted; stay in polling-only mode until a manual refresh.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: u32,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.interval)
        }
    }

    /// A handshake succeeded.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Manual refresh grants a fresh set of attempts.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failed connects so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
