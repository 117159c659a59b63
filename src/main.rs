use std::sync::Arc;

use idempotency_engine::api::{create_router, AppState, IdempotencyState};
use idempotency_engine::config::Settings;
use idempotency_engine::idempotency::{
    build_key_store, CoordinatorConfig, ExpiredEntrySweeper, IdempotencyCoordinator,
};
use idempotency_engine::observability::{init_logging, init_metrics, LogConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging and metrics
    init_logging(&LogConfig::from(&settings.logging));
    let metrics_handle = init_metrics();
    info!("Configuration loaded");

    // Connect to the configured key store
    info!(backend = ?settings.idempotency.backend, "Initializing key store...");
    let store = build_key_store(&settings).await?;
    info!("Key store ready: {}", store.backend_name());

    let coordinator = Arc::new(
        IdempotencyCoordinator::new(store.clone())
            .with_config(CoordinatorConfig::from(&settings.idempotency)),
    );

    if settings.idempotency.cleanup_interval_secs > 0 {
        ExpiredEntrySweeper::new(store, settings.idempotency.cleanup_interval_secs).start();
        info!(
            "Expired entry sweeper started (every {}s)",
            settings.idempotency.cleanup_interval_secs
        );
    }

    let idempotency = IdempotencyState::new(coordinator, &settings.idempotency)?;
    let state = AppState::new(idempotency).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
