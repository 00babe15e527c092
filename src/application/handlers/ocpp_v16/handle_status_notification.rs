//! StatusNotification handler

use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{parse_payload, to_payload, InboundAction};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::domain::ChargePointStatus;

pub async fn handle_status_notification(
    handler: &OcppHandler,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let req: StatusNotificationRequest =
        parse_payload(InboundAction::StatusNotification, payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        status = ?req.status,
        error_code = ?req.error_code,
        info = ?req.info,
        "StatusNotification"
    );

    let status = ChargePointStatus::from_notification(req.connector_id, &req.status, &req.error_code);

    let ctx = &handler.ctx;
    ctx.store.save_status(&handler.charge_point_id, status).await?;
    if let Some(change) = ctx.registry.set_status(&handler.charge_point_id, status) {
        ctx.publish_status_change(&change);
    }

    to_payload(&StatusNotificationResponse {})
}
