//! Heartbeat handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use serde_json::Value;
use tracing::debug;

use super::{parse_payload, to_payload, InboundAction};
use crate::application::handlers::{HandlerError, OcppHandler};

pub async fn handle_heartbeat(handler: &OcppHandler, payload: &Value) -> Result<Value, HandlerError> {
    let _req: HeartbeatRequest = parse_payload(InboundAction::Heartbeat, payload)?;

    debug!(charge_point_id = handler.charge_point_id.as_str(), "Heartbeat");

    if let Some(change) = handler.ctx.registry.touch(&handler.charge_point_id) {
        handler.ctx.record_status_change(&change).await;
    }

    to_payload(&HeartbeatResponse {
        current_time: Utc::now(),
    })
}
