use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use courier_queue::api;
use courier_queue::config::Config;
use courier_queue::display::run_display_invalidator;
use courier_queue::engine::queue::refresh_queue_length;
use courier_queue::engine::reset::{run_daily_reset, ResetSchedule};
use courier_queue::error::AppError;
use courier_queue::state::AppState;
use courier_queue::store;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let pool = store::connect(&config.database_url, config.database_max_connections).await?;
    let shared_state = Arc::new(AppState::new(pool, &config));
    refresh_queue_length(&shared_state).await;

    match &config.geofence {
        Some(geofence) => tracing::info!(
            lat = geofence.center.lat,
            lon = geofence.center.lon,
            radius_m = geofence.radius_m,
            freshness_secs = geofence.freshness.as_secs(),
            "geofence enabled"
        ),
        None => tracing::info!("geofence disabled"),
    }
    if let Some(base_url) = &config.public_base_url {
        tracing::info!(bot_endpoint = %format!("{base_url}/bot"), "chat adapter endpoint");
    }

    tokio::spawn(run_display_invalidator(shared_state.clone()));
    tokio::spawn(run_daily_reset(
        shared_state.clone(),
        ResetSchedule::new(config.reset_time, config.utc_offset),
    ));

    let app = api::rest::router(shared_state.clone(), &config.static_dir);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

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
