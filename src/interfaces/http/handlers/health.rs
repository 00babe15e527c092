//! Health check and service metadata handlers

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use super::ApiState;

const SERVICE_NAME: &str = "OCPP Gateway";

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

/// `GET /health`
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// `GET /`: service, version and protocol metadata with the endpoint map.
pub async fn service_info(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "ocpp1.6",
        "connectedChargePoints": state.session_registry.count_connected(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "endpoints": {
            "websocket": format!("ws://{}/{{chargePointId}}", state.ws_address),
            "health": "/health",
            "metrics": "/metrics",
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.service, "OCPP Gateway");
        assert!(chrono::DateTime::parse_from_rfc3339(&body.timestamp).is_ok());
    }

    #[tokio::test]
    async fn service_info_lists_endpoints() {
        let state = ApiState::for_tests("127.0.0.1:9000");
        let Json(body) = service_info(State(state)).await;

        assert_eq!(body["protocol"], "ocpp1.6");
        assert_eq!(body["connectedChargePoints"], 0);
        assert_eq!(
            body["endpoints"]["websocket"],
            "ws://127.0.0.1:9000/{chargePointId}"
        );
        assert_eq!(body["endpoints"]["metrics"], "/metrics");
    }
}
