//! Derived order snapshot
//!
//! A snapshot is never stored independently: it is the result of folding an
//! order's event sequence onto its initial state. Server and client share
//! [`Snapshot::apply`] so a client that has seen events `1..=N` holds exactly
//! the snapshot the server would report at `lastEventId = N`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventType, GeoPoint, TrackingEvent, META_DRIVER_NAME, META_VEHICLE};
use crate::ids::{OrderCredential, TrackingNumber};

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    DriverAssigned,
    PickedUp,
    EnRoute,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Wire label, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::DriverAssigned => "driver_assigned",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::EnRoute => "en_route",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Human readable label shown by tracking pages
    pub fn display_name(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Order Created",
            OrderStatus::DriverAssigned => "Driver Assigned",
            OrderStatus::PickedUp => "Picked Up",
            OrderStatus::EnRoute => "En Route",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Status an event moves the order into; `None` leaves it unchanged
    pub fn after(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::Created => Some(OrderStatus::Created),
            EventType::DriverAssigned => Some(OrderStatus::DriverAssigned),
            EventType::PickedUp => Some(OrderStatus::PickedUp),
            EventType::EnRoute => Some(OrderStatus::EnRoute),
            EventType::LocationUpdate => None,
            EventType::Delivered => Some(OrderStatus::Delivered),
            EventType::Cancelled => Some(OrderStatus::Cancelled),
        }
    }
}

/// Pickup or delivery stop; fixed at order placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopInfo {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_window: Option<String>,
}

impl StopInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            contact_name: None,
            scheduled_window: None,
        }
    }
}

/// Driver details as known from the event stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub assigned: bool,
    pub name: Option<String>,
    pub vehicle: Option<String>,
    pub last_location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
}

/// Immutable facts captured when an order is registered for tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub credential: OrderCredential,
    pub pickup: StopInfo,
    pub delivery: StopInfo,
    pub created_at: DateTime<Utc>,
}

/// Full tracking snapshot for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tracking_number: TrackingNumber,
    pub status: OrderStatus,
    pub status_display_name: String,
    pub pickup: Option<StopInfo>,
    pub delivery: Option<StopInfo>,
    pub driver: DriverInfo,
    pub last_event_id: u64,
    pub last_update_timestamp: DateTime<Utc>,
    pub timeline: Vec<TrackingEvent>,
}

impl Snapshot {
    /// State of a freshly registered order before any event is folded in
    pub fn initial(record: &OrderRecord) -> Self {
        Self {
            tracking_number: record.credential.tracking_number.clone(),
            status: OrderStatus::Created,
            status_display_name: OrderStatus::Created.display_name().to_string(),
            pickup: Some(record.pickup.clone()),
            delivery: Some(record.delivery.clone()),
            driver: DriverInfo::default(),
            last_event_id: 0,
            last_update_timestamp: record.created_at,
            timeline: Vec::new(),
        }
    }

    /// Placeholder for a client that has not received any data yet.
    ///
    /// Its timestamp sorts before every real snapshot, so the first snapshot
    /// that arrives always replaces it.
    pub fn blank(tracking_number: TrackingNumber) -> Self {
        Self {
            tracking_number,
            status: OrderStatus::Created,
            status_display_name: OrderStatus::Created.display_name().to_string(),
            pickup: None,
            delivery: None,
            driver: DriverInfo::default(),
            last_event_id: 0,
            last_update_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            timeline: Vec::new(),
        }
    }

    /// Fold one event into the snapshot.
    ///
    /// Returns false, leaving the snapshot untouched, when the event id is not
    /// greater than `last_event_id`.
    pub fn apply(&mut self, event: &TrackingEvent) -> bool {
        if event.id <= self.last_event_id {
            return false;
        }

        // Terminal status is sticky
        if !self.status.is_terminal() {
            if let Some(status) = OrderStatus::after(event.event_type) {
                self.status = status;
                self.status_display_name = status.display_name().to_string();
            }
        }

        if event.event_type == EventType::DriverAssigned {
            self.driver.assigned = true;
            if let Some(name) = event.meta(META_DRIVER_NAME) {
                self.driver.name = Some(name.to_string());
            }
            if let Some(vehicle) = event.meta(META_VEHICLE) {
                self.driver.vehicle = Some(vehicle.to_string());
            }
        }

        if let Some(location) = event.location {
            self.driver.last_location = Some(location);
            self.driver.location_updated_at = Some(event.timestamp);
        }

        self.last_event_id = event.id;
        self.last_update_timestamp = self.last_update_timestamp.max(event.timestamp);
        self.timeline.push(event.clone());
        true
    }

    /// Freshness key used when comparing two snapshots of the same order
    pub fn version(&self) -> (DateTime<Utc>, u64) {
        (self.last_update_timestamp, self.last_event_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDraft;
    use chrono::{Duration, TimeZone};

    fn make_record() -> OrderRecord {
        OrderRecord {
            credential: OrderCredential::parse("RTN-ABC12345", "63101").unwrap(),
            pickup: StopInfo::new("1 Market St, St. Louis"),
            delivery: StopInfo::new("500 Olive St, St. Louis"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn make_event(id: u64, event_type: EventType) -> TrackingEvent {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(id as i64);
        EventDraft::new(event_type, "").into_event(id, ts)
    }

    #[test]
    fn test_initial_snapshot() {
        let snapshot = Snapshot::initial(&make_record());
        assert_eq!(snapshot.status, OrderStatus::Created);
        assert_eq!(snapshot.status_display_name, "Order Created");
        assert_eq!(snapshot.last_event_id, 0);
        assert!(snapshot.pickup.is_some());
        assert!(snapshot.timeline.is_empty());
    }

    #[test]
    fn test_apply_advances_status_and_timeline() {
        let mut snapshot = Snapshot::initial(&make_record());
        assert!(snapshot.apply(&make_event(1, EventType::Created)));
        assert!(snapshot.apply(&make_event(2, EventType::PickedUp)));

        assert_eq!(snapshot.status, OrderStatus::PickedUp);
        assert_eq!(snapshot.status_display_name, "Picked Up");
        assert_eq!(snapshot.last_event_id, 2);
        assert_eq!(snapshot.timeline.len(), 2);
        assert_eq!(snapshot.last_update_timestamp, make_event(2, EventType::PickedUp).timestamp);
    }

    #[test]
    fn test_apply_rejects_stale_ids() {
        let mut snapshot = Snapshot::initial(&make_record());
        snapshot.apply(&make_event(1, EventType::Created));
        snapshot.apply(&make_event(2, EventType::EnRoute));
        let before = snapshot.clone();

        assert!(!snapshot.apply(&make_event(2, EventType::Cancelled)));
        assert!(!snapshot.apply(&make_event(1, EventType::Delivered)));
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_driver_assignment_reads_metadata() {
        let mut snapshot = Snapshot::initial(&make_record());
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap();
        let event = EventDraft::new(EventType::DriverAssigned, "Driver assigned")
            .with_metadata(META_DRIVER_NAME, "Dana")
            .with_metadata(META_VEHICLE, "White Ford Transit")
            .into_event(1, ts);

        snapshot.apply(&event);
        assert!(snapshot.driver.assigned);
        assert_eq!(snapshot.driver.name.as_deref(), Some("Dana"));
        assert_eq!(snapshot.driver.vehicle.as_deref(), Some("White Ford Transit"));
    }

    #[test]
    fn test_location_update_keeps_status() {
        let mut snapshot = Snapshot::initial(&make_record());
        snapshot.apply(&make_event(1, EventType::EnRoute));

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let point = GeoPoint::new(38.627, -90.199).unwrap();
        let ping = EventDraft::new(EventType::LocationUpdate, "")
            .with_location(point)
            .into_event(2, ts);
        snapshot.apply(&ping);

        assert_eq!(snapshot.status, OrderStatus::EnRoute);
        assert_eq!(snapshot.driver.last_location, Some(point));
        assert_eq!(snapshot.driver.location_updated_at, Some(ts));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut snapshot = Snapshot::initial(&make_record());
        snapshot.apply(&make_event(1, EventType::Delivered));
        snapshot.apply(&make_event(2, EventType::EnRoute));
        assert_eq!(snapshot.status, OrderStatus::Delivered);
        assert!(snapshot.is_terminal());
    }

    #[test]
    fn test_blank_sorts_before_initial() {
        let record = make_record();
        let blank = Snapshot::blank(record.credential.tracking_number.clone());
        assert!(blank.version() < Snapshot::initial(&record).version());
    }

    #[test]
    fn test_snapshot_json_is_camel_case() {
        let mut snapshot = Snapshot::initial(&make_record());
        snapshot.apply(&make_event(1, EventType::Created));
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["trackingNumber"], "RTN-ABC12345");
        assert_eq!(value["statusDisplayName"], "Order Created");
        assert_eq!(value["lastEventId"], 1);
        assert_eq!(value["driver"]["assigned"], false);
        assert_eq!(value["timeline"].as_array().unwrap().len(), 1);
    }
}
