//! Push channel wire messages
//!
//! Every frame on the push channel is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::event::{EventType, TrackingEvent};
use crate::ids::TrackingNumber;
use crate::snapshot::Snapshot;

/// Response body of the event history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub tracking_number: TrackingNumber,
    pub total_events: usize,
    pub events: Vec<TrackingEvent>,
}

impl EventLog {
    pub fn new(tracking_number: TrackingNumber, events: Vec<TrackingEvent>) -> Self {
        Self {
            tracking_number,
            total_events: events.len(),
            events,
        }
    }
}

/// Error codes carried by [`PushMessage::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushErrorCode {
    /// Credential pair rejected; the server closes with 1008 afterwards
    Unauthorized,
    /// Subscription request could not be parsed
    BadRequest,
    /// No subscription request arrived in time
    HandshakeTimeout,
    /// Too many subscription attempts for this tracking number; the server
    /// closes with 1013
    RateLimited,
}

/// Server-to-client push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    #[serde(rename_all = "camelCase")]
    Snapshot {
        tracking_number: TrackingNumber,
        data: Snapshot,
    },
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        tracking_number: TrackingNumber,
        data: TrackingEvent,
    },
    #[serde(rename_all = "camelCase")]
    LocationUpdate {
        tracking_number: TrackingNumber,
        data: TrackingEvent,
    },
    Error {
        code: PushErrorCode,
        message: String,
    },
}

impl PushMessage {
    /// Wrap a committed event, choosing the tag from its type
    pub fn from_event(tracking_number: TrackingNumber, event: TrackingEvent) -> Self {
        if event.event_type == EventType::LocationUpdate {
            PushMessage::LocationUpdate {
                tracking_number,
                data: event,
            }
        } else {
            PushMessage::StatusUpdate {
                tracking_number,
                data: event,
            }
        }
    }

    pub fn unauthorized() -> Self {
        PushMessage::Error {
            code: PushErrorCode::Unauthorized,
            message: crate::errors::AuthorizationError::NotFound.to_string(),
        }
    }

    /// Event id carried by the message (snapshots report their last event)
    pub fn event_id(&self) -> Option<u64> {
        match self {
            PushMessage::Snapshot { data, .. } => Some(data.last_event_id),
            PushMessage::StatusUpdate { data, .. } | PushMessage::LocationUpdate { data, .. } => {
                Some(data.id)
            }
            PushMessage::Error { .. } => None,
        }
    }
}
