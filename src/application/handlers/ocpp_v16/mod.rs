//! OCPP 1.6 Action handlers
//!
//! Routes charge-point initiated actions to their handlers. Payloads are
//! deserialized into `rust_ocpp::v1_6` types within each handler.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{HandlerError, OcppHandler};

mod handle_authorize;
mod handle_boot_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

pub use handle_authorize::handle_authorize;
pub use handle_boot_notification::handle_boot_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::handle_meter_values;
pub use handle_start_transaction::handle_start_transaction;
pub use handle_status_notification::handle_status_notification;
pub use handle_stop_transaction::handle_stop_transaction;

/// Actions a charge point may initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    BootNotification,
    Heartbeat,
    StatusNotification,
    Authorize,
    StartTransaction,
    StopTransaction,
    MeterValues,
}

impl InboundAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootNotification => "BootNotification",
            Self::Heartbeat => "Heartbeat",
            Self::StatusNotification => "StatusNotification",
            Self::Authorize => "Authorize",
            Self::StartTransaction => "StartTransaction",
            Self::StopTransaction => "StopTransaction",
            Self::MeterValues => "MeterValues",
        }
    }
}

impl FromStr for InboundAction {
    type Err = HandlerError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "BootNotification" => Ok(Self::BootNotification),
            "Heartbeat" => Ok(Self::Heartbeat),
            "StatusNotification" => Ok(Self::StatusNotification),
            "Authorize" => Ok(Self::Authorize),
            "StartTransaction" => Ok(Self::StartTransaction),
            "StopTransaction" => Ok(Self::StopTransaction),
            "MeterValues" => Ok(Self::MeterValues),
            other => Err(HandlerError::NotImplemented(other.to_string())),
        }
    }
}

/// Routes an inbound action to its handler.
pub async fn action_matcher(
    handler: &OcppHandler,
    action: InboundAction,
    payload: &Value,
) -> Result<Value, HandlerError> {
    match action {
        InboundAction::BootNotification => handle_boot_notification(handler, payload).await,
        InboundAction::Heartbeat => handle_heartbeat(handler, payload).await,
        InboundAction::StatusNotification => handle_status_notification(handler, payload).await,
        InboundAction::Authorize => handle_authorize(handler, payload).await,
        InboundAction::StartTransaction => handle_start_transaction(handler, payload).await,
        InboundAction::StopTransaction => handle_stop_transaction(handler, payload).await,
        InboundAction::MeterValues => handle_meter_values(handler, payload).await,
    }
}

/// Deserialize a request payload; anything that does not fit the schema is
/// a FormationViolation.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    action: InboundAction,
    payload: &Value,
) -> Result<T, HandlerError> {
    if !payload.is_object() {
        return Err(HandlerError::FormationViolation(format!(
            "{} payload must be a JSON object",
            action.as_str()
        )));
    }
    serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::FormationViolation(format!("{}: {}", action.as_str(), e)))
}

pub(crate) fn to_payload<T: Serialize>(response: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(response).map_err(|e| HandlerError::Internal(e.to_string()))
}

/// The wire spelling of a `rust_ocpp` enum value ("Energy.Active.Import.Register").
pub(crate) fn wire_name<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => format!("{:?}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!(
            "BootNotification".parse::<InboundAction>().unwrap(),
            InboundAction::BootNotification
        );
        assert_eq!("MeterValues".parse::<InboundAction>().unwrap().as_str(), "MeterValues");
        assert!(matches!(
            "DataTransfer".parse::<InboundAction>(),
            Err(HandlerError::NotImplemented(_))
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let result: Result<Value, _> = parse_payload(InboundAction::Heartbeat, &Value::Null);
        assert!(matches!(result, Err(HandlerError::FormationViolation(_))));
    }

    #[test]
    fn wire_name_uses_serde_spelling() {
        use rust_ocpp::v1_6::types::Measurand;
        assert_eq!(
            wire_name(&Measurand::EnergyActiveImportRegister),
            "Energy.Active.Import.Register"
        );
    }
}
