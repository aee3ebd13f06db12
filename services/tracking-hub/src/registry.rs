//! Channel registry: per-order subscriber membership
//!
//! Maps a tracking number to the set of push connections watching it. The
//! registry is the only owner of channel membership; connection tasks hold a
//! [`Subscription`] guard and never touch the map directly.
//!
//! - A channel is created on its first subscriber and destroyed when the last
//!   one leaves, or when it has been idle longer than the configured TTL.
//! - Subscribers within a channel are kept in a BTreeMap, so fan-out visits
//!   them in connection order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracking_types::ids::TrackingNumber;

use crate::backpressure::{BackpressureAction, ConnectionQueue, OutboundMessage};
use crate::metrics::HubMetrics;

/// Unique push connection handle.
pub type ConnectionId = u64;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// A channel with no subscribe or publish activity for this long is torn
    /// down; its subscribers are disconnected and must resubscribe.
    pub idle_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

struct Channel {
    subscribers: BTreeMap<ConnectionId, ConnectionQueue>,
    last_activity: Instant,
}

impl Channel {
    fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
            last_activity: Instant::now(),
        }
    }
}

/// Result of delivering one message to a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections removed during this fan-out.
    pub dropped: Vec<ConnectionId>,
}

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Subscribers removed because their receiving side was gone.
    pub dead_connections: usize,
    /// Channels removed because they were empty or idle.
    pub channels_removed: usize,
    /// Live subscribers disconnected by idle expiry.
    pub expired_connections: usize,
}

pub struct ChannelRegistry {
    channels: DashMap<TrackingNumber, Channel>,
    next_id: AtomicU64,
    config: RegistryConfig,
    metrics: Arc<HubMetrics>,
}

impl ChannelRegistry {
    pub fn new(config: RegistryConfig, metrics: Arc<HubMetrics>) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Attach a new connection to the order's channel.
    ///
    /// The returned guard owns the connection's receiving queue; dropping it
    /// unsubscribes.
    pub fn subscribe(self: &Arc<Self>, tracking_number: &TrackingNumber) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, receiver) = ConnectionQueue::bounded(self.config.queue_capacity);

        let mut created = false;
        {
            let mut channel = self
                .channels
                .entry(tracking_number.clone())
                .or_insert_with(|| {
                    created = true;
                    Channel::new()
                });
            channel.subscribers.insert(id, queue);
            channel.last_activity = Instant::now();
        }

        if created {
            self.metrics.channel_opened();
            info!(tracking_number = %tracking_number, "Channel created");
        }
        self.metrics.subscriber_added();
        debug!(tracking_number = %tracking_number, connection_id = id, "Connection subscribed");

        Subscription {
            id,
            tracking_number: tracking_number.clone(),
            receiver,
            registry: Arc::clone(self),
        }
    }

    /// Detach a connection. Returns false if it was already gone.
    pub fn unsubscribe(&self, tracking_number: &TrackingNumber, id: ConnectionId) -> bool {
        let removed = match self.channels.get_mut(tracking_number) {
            Some(mut channel) => channel.subscribers.remove(&id).is_some(),
            None => false,
        };

        if removed {
            self.metrics.subscriber_removed();
            debug!(tracking_number = %tracking_number, connection_id = id, "Connection unsubscribed");
            self.remove_if_empty(tracking_number);
        }
        removed
    }

    /// Queue a message for every subscriber of the order.
    ///
    /// Never waits: a subscriber whose queue is full is removed from the
    /// channel and its connection task sees the queue close.
    pub fn fan_out(&self, tracking_number: &TrackingNumber, message: OutboundMessage) -> FanOutReport {
        let mut report = FanOutReport::default();

        {
            let Some(mut channel) = self.channels.get_mut(tracking_number) else {
                return report;
            };
            channel.last_activity = Instant::now();

            for (&id, queue) in channel.subscribers.iter() {
                match queue.enqueue(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(BackpressureAction::DisconnectClient) => {
                        self.metrics.record_backpressure_drop();
                        warn!(
                            tracking_number = %tracking_number,
                            connection_id = id,
                            event_id = message.event_id,
                            "Backpressure: disconnecting lagging client"
                        );
                        report.dropped.push(id);
                    }
                    Err(BackpressureAction::Gone) => report.dropped.push(id),
                }
            }

            for id in &report.dropped {
                channel.subscribers.remove(id);
                self.metrics.subscriber_removed();
            }
        }

        if !report.dropped.is_empty() {
            self.remove_if_empty(tracking_number);
        }
        self.metrics.record_delivered(report.delivered as u64);
        report
    }

    /// Remove dead subscribers, empty channels and channels idle past the TTL.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let ttl = self.config.idle_ttl;

        self.channels.retain(|tracking_number, channel| {
            let before = channel.subscribers.len();
            channel.subscribers.retain(|_, queue| !queue.is_closed());
            let dead = before - channel.subscribers.len();
            report.dead_connections += dead;
            for _ in 0..dead {
                self.metrics.subscriber_removed();
            }

            let idle = now.saturating_duration_since(channel.last_activity) > ttl;
            if channel.subscribers.is_empty() || idle {
                if idle && !channel.subscribers.is_empty() {
                    report.expired_connections += channel.subscribers.len();
                    for _ in 0..channel.subscribers.len() {
                        self.metrics.subscriber_removed();
                    }
                    self.metrics.channel_expired();
                    info!(
                        tracking_number = %tracking_number,
                        subscribers = channel.subscribers.len(),
                        "Channel expired after idle TTL"
                    );
                }
                report.channels_removed += 1;
                self.metrics.channel_closed();
                false
            } else {
                true
            }
        });

        if report != SweepReport::default() {
            debug!(
                dead_connections = report.dead_connections,
                channels_removed = report.channels_removed,
                expired_connections = report.expired_connections,
                "Registry sweep"
            );
        }
        report
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn remove_if_empty(&self, tracking_number: &TrackingNumber) {
        if self
            .channels
            .remove_if(tracking_number, |_, channel| channel.subscribers.is_empty())
            .is_some()
        {
            self.metrics.channel_closed();
            info!(tracking_number = %tracking_number, "Channel destroyed");
        }
    }
}

/// A connection's membership in one order channel.
pub struct Subscription {
    id: ConnectionId,
    tracking_number: TrackingNumber,
    receiver: mpsc::Receiver<OutboundMessage>,
    registry: Arc<ChannelRegistry>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn tracking_number(&self) -> &TrackingNumber {
        &self.tracking_number
    }

    /// Next queued message; `None` once the registry has dropped this
    /// connection and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.tracking_number, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry(queue_capacity: usize) -> Arc<ChannelRegistry> {
        let config = RegistryConfig {
            queue_capacity,
            ..RegistryConfig::default()
        };
        Arc::new(ChannelRegistry::new(config, Arc::new(HubMetrics::new())))
    }

    fn tn(raw: &str) -> TrackingNumber {
        TrackingNumber::parse(raw).unwrap()
    }

    fn make_message(id: u64) -> OutboundMessage {
        OutboundMessage::new(id, format!("{{\"id\":{}}}", id))
    }

    fn subscriber_count(registry: &ChannelRegistry, tracking_number: &TrackingNumber) -> usize {
        registry
            .channels
            .get(tracking_number)
            .map_or(0, |channel| channel.subscribers.len())
    }

    fn is_subscribed(registry: &ChannelRegistry, tracking_number: &TrackingNumber, id: ConnectionId) -> bool {
        registry
            .channels
            .get(tracking_number)
            .is_some_and(|channel| channel.subscribers.contains_key(&id))
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let registry = make_registry(8);
        let order = tn("RTN-1");

        let a = registry.subscribe(&order);
        let b = registry.subscribe(&order);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.channel_count(), 1);
        assert_eq!(subscriber_count(&registry, &order), 2);

        drop(a);
        assert_eq!(subscriber_count(&registry, &order), 1);
        drop(b);
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.metrics.snapshot().channels_active, 0);
        assert_eq!(registry.metrics.snapshot().subscribers_active, 0);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let registry = make_registry(8);
        let order = tn("RTN-1");
        let mut sub = registry.subscribe(&order);

        for id in 1..=3 {
            registry.fan_out(&order, make_message(id));
        }

        for expected in 1..=3 {
            assert_eq!(sub.recv().await.unwrap().event_id, expected);
        }
    }

    #[tokio::test]
    async fn test_fan_out_only_reaches_own_channel() {
        let registry = make_registry(8);
        let mut a = registry.subscribe(&tn("RTN-1"));
        let mut b = registry.subscribe(&tn("RTN-2"));

        let report = registry.fan_out(&tn("RTN-1"), make_message(1));
        assert_eq!(report.delivered, 1);
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_dropped_without_affecting_others() {
        let registry = make_registry(2);
        let order = tn("RTN-1");
        let mut slow = registry.subscribe(&order);
        let mut fast = registry.subscribe(&order);

        let mut dropped = Vec::new();
        for id in 1..=5 {
            let report = registry.fan_out(&order, make_message(id));
            dropped.extend(report.dropped);
            // Only the fast subscriber keeps reading
            assert_eq!(fast.try_recv().unwrap().event_id, id);
        }

        assert_eq!(dropped, vec![slow.id()]);
        assert!(!is_subscribed(&registry, &order, slow.id()));
        assert!(is_subscribed(&registry, &order, fast.id()));

        // The slow connection drains what it had, then sees its queue close
        assert_eq!(slow.recv().await.unwrap().event_id, 1);
        assert_eq!(slow.recv().await.unwrap().event_id, 2);
        assert!(slow.recv().await.is_none());
        assert_eq!(registry.metrics.snapshot().connections_dropped_backpressure, 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_missing_channel_is_noop() {
        let registry = make_registry(2);
        let report = registry.fan_out(&tn("RTN-1"), make_message(1));
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_idle_channels() {
        let config = RegistryConfig {
            queue_capacity: 4,
            idle_ttl: Duration::from_secs(60),
        };
        let registry = Arc::new(ChannelRegistry::new(config, Arc::new(HubMetrics::new())));
        let order = tn("RTN-1");
        let mut sub = registry.subscribe(&order);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.sweep(Instant::now()), SweepReport::default());

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = registry.sweep(Instant::now());
        assert_eq!(report.channels_removed, 1);
        assert_eq!(report.expired_connections, 1);
        assert_eq!(registry.channel_count(), 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_activity_keeps_channel_alive() {
        let config = RegistryConfig {
            queue_capacity: 4,
            idle_ttl: Duration::from_secs(60),
        };
        let registry = Arc::new(ChannelRegistry::new(config, Arc::new(HubMetrics::new())));
        let order = tn("RTN-1");
        let _sub = registry.subscribe(&order);

        tokio::time::advance(Duration::from_secs(50)).await;
        registry.fan_out(&order, make_message(1));
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(registry.sweep(Instant::now()).channels_removed, 0);
        assert_eq!(registry.channel_count(), 1);
    }
}
