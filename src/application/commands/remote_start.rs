//! Remote Start Transaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use tracing::info;

use crate::application::session::SharedSessionRegistry;

use super::{send_command, CommandError, OutboundAction};

pub async fn remote_start_transaction(
    registry: &SharedSessionRegistry,
    charge_point_id: &str,
    id_tag: &str,
    connector_id: Option<u32>,
) -> Result<String, CommandError> {
    info!(charge_point_id, id_tag, ?connector_id, "RemoteStartTransaction");

    if id_tag.is_empty() {
        return Err(CommandError::InvalidRequest("idTag must not be empty".to_string()));
    }

    let request = RemoteStartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        charging_profile: None,
    };
    let response: RemoteStartTransactionResponse = send_command(
        registry,
        charge_point_id,
        OutboundAction::RemoteStartTransaction,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}
