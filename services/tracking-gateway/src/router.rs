use crate::handlers::{health, internal, tracking, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let tracking_routes = Router::new()
        .route("/tracking/{tracking_number}", get(tracking::get_snapshot))
        .route("/tracking/{tracking_number}/events", get(tracking::get_events))
        .route("/ws/tracking", get(ws::ws_handler));

    let internal_routes = Router::new()
        .route("/orders", post(internal::register_order))
        .route("/orders/{tracking_number}/events", post(internal::publish_event));

    Router::new()
        .merge(tracking_routes)
        .nest("/internal", internal_routes)
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
