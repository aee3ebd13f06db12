use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracking_gateway::{AppState, GatewayConfig, create_router, run_sweeper};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        queue_capacity = config.queue_capacity,
        internal_token = config.internal_token.is_some(),
        "Starting tracking gateway"
    );

    let addr = config.addr();
    let state = AppState::new(config);
    tokio::spawn(run_sweeper(state.clone()));

    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
