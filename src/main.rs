use std::sync::Arc;

use tokio::time::{Duration, interval};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use delivery_core::api;
use delivery_core::config::{Config, LogFormat};
use delivery_core::error::AppError;
use delivery_core::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let shared_state = Arc::new(AppState::new(&config));
    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_rate_limit_sweeper(
        shared_state.clone(),
        Duration::from_secs(config.rate_limit_sweep_secs.max(1)),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn run_rate_limit_sweeper(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let removed = state.service.sweep_rate_limits();
        if removed > 0 {
            debug!(removed, "swept idle rate limit buckets");
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
