//! Commands sent from the gateway to charge points
//!
//! [`CallCorrelator`] owns the request/response bookkeeping of a single
//! connection. The per-action modules build typed requests, route them to
//! the live connection through the session registry and decode the
//! charge point's answer.

pub mod change_configuration;
pub mod correlator;
pub mod dispatcher;
pub mod remote_start;
pub mod remote_stop;
pub mod reset;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::application::session::SharedSessionRegistry;

pub use change_configuration::change_configuration;
pub use correlator::CallCorrelator;
pub use dispatcher::CommandDispatcher;
pub use remote_start::remote_start_transaction;
pub use remote_stop::remote_stop_transaction;
pub use reset::{reset, ResetKind};

/// Command sender errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Charge point not connected: {0}")]
    UnreachableTarget(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Too many calls in flight")]
    Busy,
    #[error("Message id already pending: {0}")]
    DuplicateMessageId(String),
    #[error("CallError {code}: {description}")]
    Remote { code: String, description: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Actions the gateway may initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAction {
    RemoteStartTransaction,
    RemoteStopTransaction,
    Reset,
    ChangeConfiguration,
}

impl OutboundAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteStartTransaction => "RemoteStartTransaction",
            Self::RemoteStopTransaction => "RemoteStopTransaction",
            Self::Reset => "Reset",
            Self::ChangeConfiguration => "ChangeConfiguration",
        }
    }

    /// Whether an inbound Call with this action name is one only the
    /// gateway should send.
    pub fn is_outbound_action(action: &str) -> bool {
        matches!(
            action,
            "RemoteStartTransaction" | "RemoteStopTransaction" | "Reset" | "ChangeConfiguration"
        )
    }
}

/// Send a typed request to a connected charge point and decode the reply.
pub async fn send_command<Req, Res>(
    registry: &SharedSessionRegistry,
    charge_point_id: &str,
    action: OutboundAction,
    request: &Req,
) -> Result<Res, CommandError>
where
    Req: Serialize,
    Res: DeserializeOwned,
{
    let connection = registry
        .lookup(charge_point_id)
        .ok_or_else(|| CommandError::UnreachableTarget(charge_point_id.to_string()))?;

    let payload = serde_json::to_value(request)
        .map_err(|e| CommandError::InvalidRequest(format!("Serialization failed: {}", e)))?;

    let result = connection.call(action.as_str(), payload).await?;

    serde_json::from_value(result).map_err(|e| {
        warn!(
            charge_point_id,
            action = action.as_str(),
            error = %e,
            "Undecodable response"
        );
        CommandError::InvalidResponse(format!("Failed to parse response: {}", e))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::application::session::{Connection, Outbound, SessionRegistry, SharedSessionRegistry};
    use crate::config::CallConfig;
    use crate::shared::OcppFrame;

    /// Registry with one connected charge point.
    pub fn connected(
        charge_point_id: &str,
    ) -> (SharedSessionRegistry, Connection, mpsc::UnboundedReceiver<Outbound>) {
        let registry = SessionRegistry::shared();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(charge_point_id, tx, &CallConfig::default());
        registry.register(connection.clone());
        (registry, connection, rx)
    }

    /// Answer the next outgoing Call with `payload`, returning it.
    pub async fn answer_next(
        connection: &Connection,
        rx: &mut mpsc::UnboundedReceiver<Outbound>,
        payload: Value,
    ) -> OcppFrame {
        let frame = match rx.recv().await {
            Some(Outbound::Frame(text)) => OcppFrame::parse(&text).unwrap(),
            other => panic!("expected a frame, got {:?}", other),
        };
        connection.correlator().resolve(OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload,
        });
        frame
    }
}
