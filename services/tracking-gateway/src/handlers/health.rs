use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;
use tracking_hub::metrics::MetricsSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub channels: usize,
    pub metrics: MetricsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        channels: state.hub.registry().channel_count(),
        metrics: state.hub.metrics().snapshot(),
    })
}

/// Plain-text counters, one `name value` line each.
pub async fn metrics(State(state): State<AppState>) -> String {
    state
        .hub
        .metrics()
        .export()
        .into_iter()
        .map(|(name, value)| format!("{name} {value}\n"))
        .collect()
}
