//! Tracking event types
//!
//! Events are append-only facts about one order. Each carries an id that is
//! monotonic per order (1, 2, 3, ...) and is the authoritative ordering key,
//! independent of the order in which events arrive at a client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::StoreError;

/// Metadata key carrying the assigned driver's display name
pub const META_DRIVER_NAME: &str = "driverName";
/// Metadata key carrying the assigned driver's vehicle description
pub const META_VEHICLE: &str = "vehicle";

/// Event type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    DriverAssigned,
    PickedUp,
    EnRoute,
    LocationUpdate,
    Delivered,
    Cancelled,
}

impl EventType {
    /// Terminal events end the order's tracking stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Delivered | EventType::Cancelled)
    }

    /// Wire label, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::DriverAssigned => "driver_assigned",
            EventType::PickedUp => "picked_up",
            EventType::EnRoute => "en_route",
            EventType::LocationUpdate => "location_update",
            EventType::Delivered => "delivered",
            EventType::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a coordinate, rejecting out-of-range or non-finite values
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let point = Self { lat, lng };
        point.is_valid().then_some(point)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Tracking event - immutable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    /// Per-order monotonic id, starting at 1
    pub id: u64,
    pub event_type: EventType,
    pub description: String,
    /// Server timestamp; non-decreasing within one order
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TrackingEvent {
    /// Look up a metadata value by key
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }
}

/// An event as submitted by order-processing logic, before the store assigns
/// its id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub event_type: EventType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Producer-side occurrence time; the store never lets it move an
    /// order's clock backwards.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventDraft {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            location: None,
            metadata: None,
            occurred_at: None,
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Structural validation performed before the draft reaches the store
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(location) = &self.location {
            if !location.is_valid() {
                return Err(StoreError::InvalidEvent {
                    reason: format!("coordinate out of range: {},{}", location.lat, location.lng),
                });
            }
        }
        if self.event_type == EventType::LocationUpdate && self.location.is_none() {
            return Err(StoreError::InvalidEvent {
                reason: "location_update requires a location".to_string(),
            });
        }
        Ok(())
    }

    /// Commit the draft with the id and timestamp chosen by the store
    pub fn into_event(self, id: u64, timestamp: DateTime<Utc>) -> TrackingEvent {
        let description = if self.description.trim().is_empty() {
            default_description(self.event_type).to_string()
        } else {
            self.description
        };

        TrackingEvent {
            id,
            event_type: self.event_type,
            description,
            timestamp,
            location: self.location,
            metadata: self.metadata,
        }
    }
}

fn default_description(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Created => "Order created",
        EventType::DriverAssigned => "Driver assigned",
        EventType::PickedUp => "Package picked up",
        EventType::EnRoute => "On the way",
        EventType::LocationUpdate => "Driver location updated",
        EventType::Delivered => "Delivered",
        EventType::Cancelled => "Order cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_type_wire_labels() {
        let json = serde_json::to_string(&EventType::DriverAssigned).unwrap();
        assert_eq!(json, "\"driver_assigned\"");
        assert_eq!(EventType::LocationUpdate.as_str(), "location_update");
    }

    #[test]
    fn test_terminal_event_types() {
        assert!(EventType::Delivered.is_terminal());
        assert!(EventType::Cancelled.is_terminal());
        assert!(!EventType::EnRoute.is_terminal());
    }

    #[test]
    fn test_geo_point_bounds() {
        assert!(GeoPoint::new(38.627, -90.199).is_some());
        assert!(GeoPoint::new(91.0, 0.0).is_none());
        assert!(GeoPoint::new(0.0, f64::NAN).is_none());
    }

    #[test]
    fn test_location_update_requires_location() {
        let draft = EventDraft::new(EventType::LocationUpdate, "ping");
        assert!(draft.validate().is_err());

        let draft = draft.with_location(GeoPoint::new(38.6, -90.2).unwrap());
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_into_event_fills_default_description() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let event = EventDraft::new(EventType::PickedUp, "  ").into_event(3, ts);
        assert_eq!(event.id, 3);
        assert_eq!(event.description, "Package picked up");
        assert_eq!(event.timestamp, ts);
    }

    #[test]
    fn test_event_json_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let event = EventDraft::new(EventType::DriverAssigned, "Driver on the way")
            .with_metadata(META_DRIVER_NAME, "Dana")
            .into_event(2, ts);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "driver_assigned");
        assert_eq!(value["metadata"]["driverName"], "Dana");
        assert!(value.get("location").is_none());
        assert_eq!(event.meta(META_DRIVER_NAME), Some("Dana"));
    }
}
