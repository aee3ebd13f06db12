//! Snapshot API
//!
//! Stateless credential-checked reads used for cold start and polling. Every
//! refusal is the same 404, whether the order is unknown, the postal code is
//! wrong or either half of the credential is malformed.

use crate::error::AppError;
use crate::rate_limit::credential_key;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracking_types::ids::OrderCredential;
use tracking_types::message::EventLog;
use tracking_types::snapshot::Snapshot;

#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    #[serde(rename = "zipCode")]
    pub zip_code: Option<String>,
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(tracking_number): Path<String>,
    Query(query): Query<TrackingQuery>,
) -> Result<Json<Snapshot>, AppError> {
    let credential = credential(&state, &tracking_number, query)?;
    let snapshot = state.hub.snapshot(&credential)?;
    Ok(Json(snapshot))
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(tracking_number): Path<String>,
    Query(query): Query<TrackingQuery>,
) -> Result<Json<EventLog>, AppError> {
    let credential = credential(&state, &tracking_number, query)?;
    let events = state.hub.events(&credential)?;
    Ok(Json(EventLog::new(credential.tracking_number, events)))
}

fn credential(
    state: &AppState,
    tracking_number: &str,
    query: TrackingQuery,
) -> Result<OrderCredential, AppError> {
    state
        .rate_limiter
        .check_rate_limit(&credential_key(tracking_number))?;

    let zip_code = query.zip_code.ok_or_else(AppError::tracking_not_found)?;
    OrderCredential::parse(tracking_number, &zip_code).map_err(|_| AppError::tracking_not_found())
}
