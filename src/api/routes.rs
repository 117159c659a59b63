use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{idempotency_middleware, IdempotencyState};
use super::orders::OrderBook;
use crate::idempotency::IdempotencyCoordinator;
use crate::observability::HealthChecker;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IdempotencyCoordinator>,
    pub idempotency: IdempotencyState,
    pub health_checker: Arc<HealthChecker>,
    pub orders: Arc<OrderBook>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(idempotency: IdempotencyState) -> Self {
        let coordinator = idempotency.coordinator.clone();
        let health_checker = Arc::new(HealthChecker::new(coordinator.store()));

        Self {
            coordinator,
            idempotency,
            health_checker,
            orders: Arc::new(OrderBook::new()),
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router with all routes.
///
/// Only the order routes go through the idempotency middleware.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/orders", post(handlers::create_order))
        .route_layer(middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ));

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/metrics/idempotency", get(handlers::idempotency_stats))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
