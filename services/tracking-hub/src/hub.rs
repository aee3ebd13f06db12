//! Tracking hub facade
//!
//! Wires the event store, channel registry, publisher and metrics together
//! and exposes the credential-checked read paths used by the gateway.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use tracking_types::errors::{AuthorizationError, StoreError};
use tracking_types::event::{EventDraft, TrackingEvent};
use tracking_types::ids::{OrderCredential, TrackingNumber};
use tracking_types::snapshot::{OrderRecord, Snapshot};

use crate::metrics::HubMetrics;
use crate::publisher::{PublishError, Publisher};
use crate::registry::{ChannelRegistry, RegistryConfig, Subscription, SweepReport};
use crate::store::{EventStore, InMemoryEventStore};

/// Failure of a credential-checked read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TrackingHub {
    store: Arc<dyn EventStore>,
    registry: Arc<ChannelRegistry>,
    publisher: Publisher,
    metrics: Arc<HubMetrics>,
}

impl TrackingHub {
    pub fn new(store: Arc<dyn EventStore>, config: RegistryConfig) -> Self {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(ChannelRegistry::new(config, Arc::clone(&metrics)));
        let publisher = Publisher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&metrics),
        );

        Self {
            store,
            registry,
            publisher,
            metrics,
        }
    }

    /// Hub backed by a fresh [`InMemoryEventStore`].
    pub fn in_memory(config: RegistryConfig) -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), config)
    }

    pub fn register_order(&self, record: OrderRecord) -> Result<Snapshot, StoreError> {
        self.store.register(record)
    }

    /// Check a credential pair against the order record.
    ///
    /// An unknown tracking number and a wrong postal code produce the same
    /// error.
    pub fn authorize(&self, credential: &OrderCredential) -> Result<(), ReadError> {
        let matches = self
            .store
            .record(&credential.tracking_number)?
            .is_some_and(|record| record.credential.postal_code == credential.postal_code);

        if matches {
            Ok(())
        } else {
            self.metrics.record_authorization_failure();
            debug!(
                tracking_number = %credential.tracking_number,
                "Credential pair rejected"
            );
            Err(AuthorizationError::NotFound.into())
        }
    }

    pub fn snapshot(&self, credential: &OrderCredential) -> Result<Snapshot, ReadError> {
        self.authorize(credential)?;
        Ok(self.store.snapshot(&credential.tracking_number)?)
    }

    pub fn events(&self, credential: &OrderCredential) -> Result<Vec<TrackingEvent>, ReadError> {
        self.authorize(credential)?;
        Ok(self.store.events(&credential.tracking_number)?)
    }

    /// Authorize, attach to the order's channel, then read the snapshot.
    ///
    /// Subscribing first means every event committed after the snapshot is
    /// already queued; queued events with `id <= snapshot.last_event_id` are
    /// duplicates the caller skips.
    pub fn open_subscription(
        &self,
        credential: &OrderCredential,
    ) -> Result<(Subscription, Snapshot), ReadError> {
        self.authorize(credential)?;
        let subscription = self.registry.subscribe(&credential.tracking_number);
        let snapshot = self.store.snapshot(&credential.tracking_number).map_err(|err| {
            warn!(
                tracking_number = %credential.tracking_number,
                error = %err,
                "Snapshot read failed after subscribe"
            );
            err
        })?;
        Ok((subscription, snapshot))
    }

    pub fn publish(
        &self,
        tracking_number: &TrackingNumber,
        draft: EventDraft,
    ) -> Result<TrackingEvent, PublishError> {
        self.publisher.publish(tracking_number, draft)
    }

    pub fn sweep(&self, now: Instant) -> SweepReport {
        self.registry.sweep(now)
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tracking_types::event::EventType;
    use tracking_types::message::PushMessage;
    use tracking_types::snapshot::StopInfo;

    fn make_hub() -> TrackingHub {
        let hub = TrackingHub::in_memory(RegistryConfig::default());
        hub.register_order(OrderRecord {
            credential: OrderCredential::parse("RTN-ABC12345", "63101").unwrap(),
            pickup: StopInfo::new("1 Market St"),
            delivery: StopInfo::new("500 Olive St"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        })
        .unwrap();
        hub
    }

    fn credential(tn: &str, zip: &str) -> OrderCredential {
        OrderCredential::parse(tn, zip).unwrap()
    }

    #[test]
    fn test_authorization_symmetry() {
        let hub = make_hub();
        let wrong_zip = hub.snapshot(&credential("RTN-ABC12345", "10001")).unwrap_err();
        let unknown = hub.snapshot(&credential("RTN-NOPE", "63101")).unwrap_err();

        assert_eq!(wrong_zip, unknown);
        assert_eq!(wrong_zip, ReadError::Unauthorized(AuthorizationError::NotFound));
        assert_eq!(hub.metrics().snapshot().authorization_failures, 2);
    }

    #[test]
    fn test_snapshot_and_events_with_valid_credential() {
        let hub = make_hub();
        let tn = TrackingNumber::parse("RTN-ABC12345").unwrap();
        hub.publish(&tn, EventDraft::new(EventType::DriverAssigned, "")).unwrap();

        let snapshot = hub.snapshot(&credential("rtn-abc12345", "63101")).unwrap();
        assert_eq!(snapshot.last_event_id, 2);
        let events = hub.events(&credential("RTN-ABC12345", "63101")).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_open_subscription_never_misses_events() {
        let hub = make_hub();
        let tn = TrackingNumber::parse("RTN-ABC12345").unwrap();

        let (mut sub, snapshot) = hub
            .open_subscription(&credential("RTN-ABC12345", "63101"))
            .unwrap();
        assert_eq!(snapshot.last_event_id, 1);

        hub.publish(&tn, EventDraft::new(EventType::PickedUp, "")).unwrap();
        let frame = sub.recv().await.unwrap();
        let message: PushMessage = serde_json::from_str(&frame.payload).unwrap();
        assert_eq!(message.event_id(), Some(2));
    }

    #[test]
    fn test_rejected_subscription_creates_no_channel() {
        let hub = make_hub();
        assert!(hub
            .open_subscription(&credential("RTN-ABC12345", "99999"))
            .is_err());
        assert_eq!(hub.registry().channel_count(), 0);
    }
}
