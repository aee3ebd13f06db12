//! Tracking gateway
//!
//! HTTP and WebSocket edge of live order tracking.
//!
//! # Modules
//! - `handlers`: Snapshot API, push gateway, internal publish API, health
//! - `router`: Route table and middleware
//! - `config`: Environment-driven configuration
//! - `state`: Shared application state
//! - `auth`: Internal caller authentication
//! - `rate_limit`: Snapshot API token buckets
//! - `error`: HTTP error mapping

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod state;

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub use config::GatewayConfig;
pub use router::create_router;
pub use state::AppState;

/// Periodically remove dead subscribers, idle channels and stale rate-limit
/// buckets. Runs until the runtime shuts down.
pub async fn run_sweeper(state: AppState) {
    let period = state.config.sweep_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let report = state.hub.sweep(Instant::now());
        let buckets = state.rate_limiter.prune(bucket_idle(&state.config));

        if report.channels_removed > 0 || report.dead_connections > 0 || report.expired_connections > 0 {
            info!(
                channels_removed = report.channels_removed,
                dead_connections = report.dead_connections,
                expired_connections = report.expired_connections,
                "Registry sweep"
            );
        }
        debug!(buckets_pruned = buckets, "Rate limiter sweep");
    }
}

/// A bucket idle this long has refilled completely.
fn bucket_idle(config: &GatewayConfig) -> Duration {
    Duration::try_from_secs_f64(f64::from(config.snapshot_rate_capacity) / config.snapshot_rate_refill)
        .unwrap_or(Duration::MAX)
}
