//! Event store: the append-only source of truth for tracking events
//!
//! Each order owns a log of events with ids 1, 2, 3, ... and a cached
//! snapshot recomputed on every append. Appends after a terminal event are
//! rejected, and an order's timestamps never move backwards.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use tracking_types::errors::StoreError;
use tracking_types::event::{EventDraft, EventType, TrackingEvent};
use tracking_types::ids::TrackingNumber;
use tracking_types::snapshot::{OrderRecord, Snapshot};

/// Storage seam used by the publisher and the read paths.
pub trait EventStore: Send + Sync {
    /// Register a new order and commit its `created` event (id 1).
    fn register(&self, record: OrderRecord) -> Result<Snapshot, StoreError>;

    /// Order record for credential checks; `None` if the order is unknown.
    fn record(&self, tracking_number: &TrackingNumber) -> Result<Option<OrderRecord>, StoreError>;

    /// Commit a draft, assigning the next id and a non-decreasing timestamp.
    fn append(
        &self,
        tracking_number: &TrackingNumber,
        draft: EventDraft,
    ) -> Result<(TrackingEvent, Snapshot), StoreError>;

    /// Cached snapshot for the order.
    fn snapshot(&self, tracking_number: &TrackingNumber) -> Result<Snapshot, StoreError>;

    /// Full event sequence in id order.
    fn events(&self, tracking_number: &TrackingNumber) -> Result<Vec<TrackingEvent>, StoreError>;
}

/// Per-order log
#[derive(Debug)]
struct OrderLog {
    record: OrderRecord,
    events: Vec<TrackingEvent>,
    snapshot: Snapshot,
}

impl OrderLog {
    fn new(record: OrderRecord) -> Self {
        let snapshot = Snapshot::initial(&record);
        Self {
            record,
            events: Vec::new(),
            snapshot,
        }
    }

    fn next_id(&self) -> u64 {
        self.events.len() as u64 + 1
    }

    fn commit(&mut self, draft: EventDraft, now: DateTime<Utc>) -> TrackingEvent {
        let requested = draft.occurred_at.unwrap_or(now);
        // Clamp so the order's clock never runs backwards
        let timestamp = requested.max(self.snapshot.last_update_timestamp);
        let event = draft.into_event(self.next_id(), timestamp);

        self.snapshot.apply(&event);
        self.events.push(event.clone());
        event
    }
}

/// In-memory event store.
///
/// Carries an availability switch so outages can be exercised end to end;
/// while unavailable every operation fails with [`StoreError::Unavailable`].
pub struct InMemoryEventStore {
    orders: DashMap<TrackingNumber, OrderLog>,
    available: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "Event store availability changed");
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "event store offline".to_string(),
            })
        }
    }

    fn unknown(tracking_number: &TrackingNumber) -> StoreError {
        StoreError::UnknownOrder {
            tracking_number: tracking_number.to_string(),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn register(&self, record: OrderRecord) -> Result<Snapshot, StoreError> {
        self.ensure_available()?;
        let tracking_number = record.credential.tracking_number.clone();

        match self.orders.entry(tracking_number.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyRegistered {
                tracking_number: tracking_number.to_string(),
            }),
            Entry::Vacant(slot) => {
                let created_at = record.created_at;
                let mut log = OrderLog::new(record);
                log.commit(
                    EventDraft::new(EventType::Created, "Order created").occurred_at(created_at),
                    created_at,
                );
                let snapshot = log.snapshot.clone();
                slot.insert(log);

                info!(tracking_number = %tracking_number, "Order registered for tracking");
                Ok(snapshot)
            }
        }
    }

    fn record(&self, tracking_number: &TrackingNumber) -> Result<Option<OrderRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self.orders.get(tracking_number).map(|log| log.record.clone()))
    }

    fn append(
        &self,
        tracking_number: &TrackingNumber,
        draft: EventDraft,
    ) -> Result<(TrackingEvent, Snapshot), StoreError> {
        self.ensure_available()?;
        draft.validate()?;

        let mut log = self
            .orders
            .get_mut(tracking_number)
            .ok_or_else(|| Self::unknown(tracking_number))?;

        if log.snapshot.is_terminal() {
            return Err(StoreError::StreamClosed {
                tracking_number: tracking_number.to_string(),
                status: log.snapshot.status.as_str().to_string(),
            });
        }

        let event = log.commit(draft, Utc::now());
        debug!(
            tracking_number = %tracking_number,
            event_id = event.id,
            event_type = %event.event_type,
            "Event appended"
        );
        Ok((event, log.snapshot.clone()))
    }

    fn snapshot(&self, tracking_number: &TrackingNumber) -> Result<Snapshot, StoreError> {
        self.ensure_available()?;
        self.orders
            .get(tracking_number)
            .map(|log| log.snapshot.clone())
            .ok_or_else(|| Self::unknown(tracking_number))
    }

    fn events(&self, tracking_number: &TrackingNumber) -> Result<Vec<TrackingEvent>, StoreError> {
        self.ensure_available()?;
        self.orders
            .get(tracking_number)
            .map(|log| log.events.clone())
            .ok_or_else(|| Self::unknown(tracking_number))
    }
}
