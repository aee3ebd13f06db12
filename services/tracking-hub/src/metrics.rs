//! Observability counters for the tracking hub
//!
//! Lock-free counters shared by the registry, publisher and gateway, exported
//! as a serializable snapshot for the health endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Core hub metrics.
#[derive(Debug, Default)]
pub struct HubMetrics {
    // Publishing
    pub events_published: AtomicU64,
    pub publish_failures: AtomicU64,

    // Fan-out
    pub messages_delivered: AtomicU64,
    pub connections_dropped_backpressure: AtomicU64,

    // Channels
    pub channels_active: AtomicU64,
    pub subscribers_active: AtomicU64,
    pub channels_expired: AtomicU64,

    // Push sessions
    pub authorization_failures: AtomicU64,
    pub heartbeat_timeouts: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub publish_failures: u64,
    pub messages_delivered: u64,
    pub connections_dropped_backpressure: u64,
    pub channels_active: u64,
    pub subscribers_active: u64,
    pub channels_expired: u64,
    pub authorization_failures: u64,
    pub heartbeat_timeouts: u64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a connection dropped because its queue overflowed.
    pub fn record_backpressure_drop(&self) {
        self.connections_dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_opened(&self) {
        self.channels_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_closed(&self) {
        saturating_decrement(&self.channels_active);
    }

    pub fn channel_expired(&self) {
        self.channels_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_added(&self) {
        self.subscribers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_removed(&self) {
        saturating_decrement(&self.subscribers_active);
    }

    pub fn record_authorization_failure(&self) {
        self.authorization_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            connections_dropped_backpressure: self
                .connections_dropped_backpressure
                .load(Ordering::Relaxed),
            channels_active: self.channels_active.load(Ordering::Relaxed),
            subscribers_active: self.subscribers_active.load(Ordering::Relaxed),
            channels_expired: self.channels_expired.load(Ordering::Relaxed),
            authorization_failures: self.authorization_failures.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Counters and gauges by name, sorted; served as text on `/metrics`.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("events_published".to_string(), s.events_published);
        m.insert("publish_failures".to_string(), s.publish_failures);
        m.insert("messages_delivered".to_string(), s.messages_delivered);
        m.insert(
            "connections_dropped_backpressure".to_string(),
            s.connections_dropped_backpressure,
        );
        m.insert("channels_active".to_string(), s.channels_active);
        m.insert("subscribers_active".to_string(), s.subscribers_active);
        m.insert("channels_expired".to_string(), s.channels_expired);
        m.insert("authorization_failures".to_string(), s.authorization_failures);
        m.insert("heartbeat_timeouts".to_string(), s.heartbeat_timeouts);
        m
    }
}

fn saturating_decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}
