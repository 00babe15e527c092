//! HTTP router

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, metrics, ApiState};

/// Build the HTTP router: `/`, `/health` and `/metrics`.
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
