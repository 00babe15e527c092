//! HTTP interface
//!
//! - `handlers`: health, service metadata and Prometheus scrape handlers
//! - `router`: axum router wiring them together

pub mod handlers;
pub mod router;

pub use handlers::ApiState;
pub use router::create_api_router;
