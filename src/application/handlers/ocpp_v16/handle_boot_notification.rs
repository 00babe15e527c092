//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::{info, warn};

use super::{parse_payload, to_payload, InboundAction};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::domain::ChargePointStatus;

pub async fn handle_boot_notification(
    handler: &OcppHandler,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let req: BootNotificationRequest = parse_payload(InboundAction::BootNotification, payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        serial_number = ?req.charge_point_serial_number,
        firmware_version = ?req.firmware_version,
        "BootNotification"
    );

    let ctx = &handler.ctx;
    let status = if ctx.config.boot.accepts(&handler.charge_point_id) {
        ctx.store
            .save_status(&handler.charge_point_id, ChargePointStatus::Online)
            .await?;
        if let Some(change) = ctx
            .registry
            .set_status(&handler.charge_point_id, ChargePointStatus::Online)
        {
            ctx.publish_status_change(&change);
        }
        RegistrationStatus::Accepted
    } else {
        warn!(
            charge_point_id = handler.charge_point_id.as_str(),
            "Charge point not in the boot allow-list, rejecting"
        );
        RegistrationStatus::Rejected
    };

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: ctx.config.heartbeat.interval_secs.try_into().unwrap_or(60),
        status,
    };

    to_payload(&response)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::context::test_support::{harness, harness_with};
    use crate::config::AppConfig;

    fn boot_payload() -> Value {
        json!({"chargePointVendor": "Acme", "chargePointModel": "Volt 1"})
    }

    #[tokio::test]
    async fn accepts_and_reports_interval() {
        let h = harness("CP1");
        let handler = OcppHandler::new(h.connection.clone(), h.ctx.clone());

        let reply = handle_boot_notification(&handler, &boot_payload()).await.unwrap();

        assert_eq!(reply["status"], "Accepted");
        assert_eq!(reply["interval"], 60);
        assert!(reply["currentTime"].is_string());
        assert_eq!(h.store.last_status("CP1"), Some(ChargePointStatus::Online));
    }

    #[tokio::test]
    async fn rejects_charge_points_outside_allow_list() {
        let mut config = AppConfig::default();
        config.boot.allowed_charge_points = vec!["CP2".into()];
        let h = harness_with("CP1", config);
        let handler = OcppHandler::new(h.connection.clone(), h.ctx.clone());

        let reply = handle_boot_notification(&handler, &boot_payload()).await.unwrap();

        assert_eq!(reply["status"], "Rejected");
        assert!(h.store.last_status("CP1").is_none());
    }

    #[tokio::test]
    async fn missing_vendor_is_formation_violation() {
        let h = harness("CP1");
        let handler = OcppHandler::new(h.connection.clone(), h.ctx.clone());

        let result = handle_boot_notification(&handler, &json!({"chargePointModel": "X"})).await;
        assert!(matches!(result, Err(HandlerError::FormationViolation(_))));
    }
}
