use std::sync::Arc;

use delivery_engine::api;
use delivery_engine::config::Config;
use delivery_engine::engine::dispatch::{run_dispatch_engine, run_expiry_sweeper};
use delivery_engine::error::AppError;
use delivery_engine::payout::provider::ProviderRegistry;
use delivery_engine::payout::settlement::run_daily_settlement;
use delivery_engine::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let providers = ProviderRegistry::from_credentials(&config.credentials);
    let http_port = config.http_port;
    let (app_state, order_rx) = AppState::new(config, providers);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_dispatch_engine(shared_state.clone(), order_rx));
    tokio::spawn(run_expiry_sweeper(shared_state.clone()));
    tokio::spawn(run_daily_settlement(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{}", http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
