//! Per-connection OCPP 1.6 message handler
//!
//! Calls are dispatched to the action handlers and always produce exactly
//! one CallResult or CallError. CallResults and CallErrors complete the
//! connection's pending outgoing calls.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::application::commands::OutboundAction;
use crate::application::context::SharedGatewayContext;
use crate::application::session::Connection;
use crate::shared::{ErrorCode, OcppFrame};

use super::ocpp_v16::{action_matcher, InboundAction};

/// Handler for one charge point connection
pub struct OcppHandler {
    pub charge_point_id: String,
    pub connection: Connection,
    pub ctx: SharedGatewayContext,
}

impl OcppHandler {
    pub fn new(connection: Connection, ctx: SharedGatewayContext) -> Self {
        Self {
            charge_point_id: connection.charge_point_id.clone(),
            connection,
            ctx,
        }
    }

    /// Process one decoded frame; returns the reply for Calls.
    pub async fn handle_frame(&self, frame: OcppFrame) -> Option<OcppFrame> {
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => Some(self.handle_call(&unique_id, &action, &payload).await),

            response => {
                if let OcppFrame::CallError {
                    unique_id,
                    error_code,
                    ..
                } = &response
                {
                    warn!(
                        charge_point_id = self.charge_point_id.as_str(),
                        message_id = unique_id.as_str(),
                        error_code = error_code.as_str(),
                        "Received CallError"
                    );
                }
                self.connection.correlator().resolve(response);
                None
            }
        }
    }

    pub async fn handle_call(&self, unique_id: &str, action: &str, payload: &Value) -> OcppFrame {
        info!(
            charge_point_id = self.charge_point_id.as_str(),
            message_id = unique_id,
            action,
            "Received Call"
        );

        let Ok(inbound) = action.parse::<InboundAction>() else {
            if OutboundAction::is_outbound_action(action) {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    "Received CS→CP action from charge point (protocol error)"
                );
            } else {
                error!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action, "Unknown OCPP 1.6 action"
                );
            }
            return OcppFrame::error_response(
                unique_id,
                ErrorCode::NotImplemented.as_str(),
                format!("Action {} is not supported", action),
            );
        };

        match action_matcher(self, inbound, payload).await {
            Ok(payload) => OcppFrame::CallResult {
                unique_id: unique_id.to_string(),
                payload,
            },
            Err(e) => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id,
                    action,
                    error = %e,
                    "Call failed"
                );
                OcppFrame::error_response(unique_id, e.code().as_str(), e.to_string())
            }
        }
    }
}
