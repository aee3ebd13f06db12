//! Publisher: append an event and fan it out
//!
//! Append and fan-out for one order run under the same stripe lock, so the
//! order in which events reach each connection is the order in which the
//! store committed them. Different orders rarely share a stripe and never
//! wait on each other's subscribers, since fan-out itself never blocks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, warn};
use tracking_types::errors::StoreError;
use tracking_types::event::{EventDraft, TrackingEvent};
use tracking_types::ids::TrackingNumber;
use tracking_types::message::PushMessage;

use crate::backpressure::OutboundMessage;
use crate::metrics::HubMetrics;
use crate::registry::ChannelRegistry;
use crate::store::EventStore;

const DEFAULT_STRIPES: usize = 64;

/// Publish failures, surfaced synchronously to order-processing logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event store write failed: {0}")]
    Store(#[from] StoreError),
}

impl PublishError {
    /// Whether the caller should retry the same publish later.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Store(err) => err.is_retryable(),
        }
    }
}

pub struct Publisher {
    store: Arc<dyn EventStore>,
    registry: Arc<ChannelRegistry>,
    metrics: Arc<HubMetrics>,
    stripes: Vec<Mutex<()>>,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<ChannelRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            stripes: (0..DEFAULT_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Append `draft` to the order's log and deliver it to live subscribers.
    ///
    /// Store failures are returned unchanged; nothing is fanned out for an
    /// event that was not committed.
    pub fn publish(
        &self,
        tracking_number: &TrackingNumber,
        draft: EventDraft,
    ) -> Result<TrackingEvent, PublishError> {
        let _guard = self
            .stripe(tracking_number)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (event, _snapshot) = match self.store.append(tracking_number, draft) {
            Ok(committed) => committed,
            Err(err) => {
                self.metrics.record_publish_failure();
                warn!(
                    tracking_number = %tracking_number,
                    error = %err,
                    retryable = err.is_retryable(),
                    "Publish failed"
                );
                return Err(err.into());
            }
        };
        self.metrics.record_published();

        let message = PushMessage::from_event(tracking_number.clone(), event.clone());
        match serde_json::to_string(&message) {
            Ok(payload) => {
                let report = self
                    .registry
                    .fan_out(tracking_number, OutboundMessage::new(event.id, payload));
                debug!(
                    tracking_number = %tracking_number,
                    event_id = event.id,
                    delivered = report.delivered,
                    dropped = report.dropped.len(),
                    "Event published"
                );
            }
            Err(err) => {
                // Committed but not pushed; subscribers catch up through polling
                error!(
                    tracking_number = %tracking_number,
                    event_id = event.id,
                    error = %err,
                    "Failed to encode push message"
                );
            }
        }

        Ok(event)
    }

    fn stripe(&self, tracking_number: &TrackingNumber) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        tracking_number.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[index]
    }
}
