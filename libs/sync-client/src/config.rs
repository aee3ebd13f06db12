//! Sync controller configuration

use std::time::Duration;

use crate::error::SyncError;

/// Timing and retry parameters for one sync controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Poll period while push is healthy; a trust-but-verify backstop.
    pub healthy_poll_interval: Duration,
    /// Poll period while push is unavailable.
    pub degraded_poll_interval: Duration,
    /// Fixed delay between reconnect attempts.
    pub retry_interval: Duration,
    /// Consecutive failed connects before settling into polling only.
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub poll_timeout: Duration,
    /// Out-of-order events held while waiting for a gap to fill.
    pub pending_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            healthy_poll_interval: Duration::from_secs(120),
            degraded_poll_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(10),
            pending_limit: 256,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        let durations = [
            ("healthy_poll_interval", self.healthy_poll_interval),
            ("degraded_poll_interval", self.degraded_poll_interval),
            ("retry_interval", self.retry_interval),
            ("connect_timeout", self.connect_timeout),
            ("poll_timeout", self.poll_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SyncError::Config(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.pending_limit == 0 {
            return Err(SyncError::Config("pending_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}
