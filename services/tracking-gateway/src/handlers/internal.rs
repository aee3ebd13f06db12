//! Internal API for order-processing logic
//!
//! Dispatch and the driver app register orders and publish events here.
//! Publish failures are returned synchronously so the caller can retry; a
//! 503 means the event was not committed.

use crate::auth::InternalCaller;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use tracking_types::event::{EventDraft, TrackingEvent};
use tracking_types::ids::{OrderCredential, TrackingNumber};
use tracking_types::snapshot::{OrderRecord, Snapshot, StopInfo};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrderRequest {
    pub tracking_number: String,
    pub zip_code: String,
    pub pickup: StopInfo,
    pub delivery: StopInfo,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub async fn register_order(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Json(payload): Json<RegisterOrderRequest>,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    let credential = OrderCredential::parse(&payload.tracking_number, &payload.zip_code)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let record = OrderRecord {
        credential,
        pickup: payload.pickup,
        delivery: payload.delivery,
        created_at: payload.created_at.unwrap_or_else(Utc::now),
    };
    let tracking_number = record.credential.tracking_number.clone();
    let snapshot = state.hub.register_order(record)?;

    info!(tracking_number = %tracking_number, "Order registered for tracking");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn publish_event(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Path(tracking_number): Path<String>,
    Json(draft): Json<EventDraft>,
) -> Result<(StatusCode, Json<TrackingEvent>), AppError> {
    let tracking_number =
        TrackingNumber::parse(&tracking_number).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let event = state.hub.publish(&tracking_number, draft).map_err(|err| {
        if err.is_retryable() {
            warn!(tracking_number = %tracking_number, error = %err, "Publish failed; caller must retry");
        }
        AppError::from(err)
    })?;

    Ok((StatusCode::CREATED, Json(event)))
}
