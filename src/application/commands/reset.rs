//! Reset command

use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::types::ResetRequestStatus;
use tracing::info;

use crate::application::session::SharedSessionRegistry;

use super::{send_command, CommandError, OutboundAction};

/// Reset type for the charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Soft reset - restart without power cycle
    Soft,
    /// Hard reset - full power cycle
    Hard,
}

impl From<ResetKind> for ResetRequestStatus {
    fn from(kind: ResetKind) -> Self {
        match kind {
            ResetKind::Soft => ResetRequestStatus::Soft,
            ResetKind::Hard => ResetRequestStatus::Hard,
        }
    }
}

/// Ask a charge point to reset; returns the reported status.
pub async fn reset(
    registry: &SharedSessionRegistry,
    charge_point_id: &str,
    kind: ResetKind,
) -> Result<String, CommandError> {
    info!(charge_point_id, ?kind, "Reset");

    let request = ResetRequest { kind: kind.into() };
    let response: ResetResponse =
        send_command(registry, charge_point_id, OutboundAction::Reset, &request).await?;

    Ok(format!("{:?}", response.status))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::commands::test_support::{answer_next, connected};

    #[tokio::test]
    async fn reset_round_trip() {
        let (registry, connection, mut rx) = connected("CP1");

        let task = tokio::spawn({
            let registry = registry.clone();
            async move { reset(&registry, "CP1", ResetKind::Hard).await }
        });

        let sent = answer_next(&connection, &mut rx, json!({"status": "Accepted"})).await;
        match sent {
            crate::shared::OcppFrame::Call { action, payload, .. } => {
                assert_eq!(action, "Reset");
                assert_eq!(payload, json!({"type": "Hard"}));
            }
            other => panic!("expected Call, got {:?}", other),
        }
        assert_eq!(task.await.unwrap().unwrap(), "Accepted");
    }

    #[tokio::test]
    async fn undecodable_response_is_invalid() {
        let (registry, connection, mut rx) = connected("CP1");

        let task = tokio::spawn({
            let registry = registry.clone();
            async move { reset(&registry, "CP1", ResetKind::Soft).await }
        });
        answer_next(&connection, &mut rx, json!({"status": 42})).await;

        assert!(matches!(
            task.await.unwrap(),
            Err(CommandError::InvalidResponse(_))
        ));
    }
}
