//! Connection state machine states
//!
//! `Disconnected -> Connecting -> Subscribed -> Degraded -> Connecting ...`,
//! with `Closed` reachable from anywhere on teardown.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and nothing in flight.
    Disconnected,
    /// Push handshake in progress.
    #[serde(rename_all = "camelCase")]
    Connecting { attempt: u32 },
    /// Push channel live.
    Subscribed,
    /// Push unavailable; polling at the short period.
    #[serde(rename_all = "camelCase")]
    Degraded {
        failed_attempts: u32,
        retry_scheduled: bool,
    },
    /// Torn down; no further updates.
    Closed,
}

impl ConnectionState {
    /// Live push feed, as opposed to periodic polling.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Subscribed)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Label for a live/periodic indicator.
    pub fn feed_label(&self) -> &'static str {
        if self.is_live() {
            "live"
        } else {
            "periodic"
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            ConnectionState::Subscribed => write!(f, "subscribed"),
            ConnectionState::Degraded {
                failed_attempts,
                retry_scheduled,
            } => write!(
                f,
                "degraded ({failed_attempts} failed, retry {})",
                if *retry_scheduled { "scheduled" } else { "off" }
            ),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
