use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use tracking_hub::TrackingHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<TrackingHub>,
    pub config: Arc<GatewayConfig>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// State backed by a fresh in-memory event store.
    pub fn new(config: GatewayConfig) -> Self {
        let hub = Arc::new(TrackingHub::in_memory(config.registry()));
        Self::with_hub(config, hub)
    }

    pub fn with_hub(config: GatewayConfig, hub: Arc<TrackingHub>) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(RateLimiter::new(
                config.snapshot_rate_capacity,
                config.snapshot_rate_refill,
            )),
            config: Arc::new(config),
        }
    }
}
