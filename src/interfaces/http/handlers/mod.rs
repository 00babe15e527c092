//! HTTP handlers

pub mod health;
pub mod metrics;

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::application::SharedSessionRegistry;

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    pub session_registry: SharedSessionRegistry,
    pub metrics: PrometheusHandle,
    /// Address charge points connect to, for the metadata endpoint.
    pub ws_address: String,
    pub started_at: Arc<Instant>,
}

#[cfg(test)]
impl ApiState {
    /// State backed by a recorder that is not installed globally.
    pub(crate) fn for_tests(ws_address: &str) -> Self {
        use metrics_exporter_prometheus::PrometheusBuilder;

        Self {
            session_registry: crate::application::SessionRegistry::shared(),
            metrics: PrometheusBuilder::new().build_recorder().handle(),
            ws_address: ws_address.to_string(),
            started_at: Arc::new(Instant::now()),
        }
    }
}
