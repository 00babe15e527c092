//! Remote Stop Transaction command

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use tracing::info;

use crate::application::session::SharedSessionRegistry;

use super::{send_command, CommandError, OutboundAction};

pub async fn remote_stop_transaction(
    registry: &SharedSessionRegistry,
    charge_point_id: &str,
    transaction_id: i32,
) -> Result<String, CommandError> {
    info!(charge_point_id, transaction_id, "RemoteStopTransaction");

    let request = RemoteStopTransactionRequest { transaction_id };
    let response: RemoteStopTransactionResponse = send_command(
        registry,
        charge_point_id,
        OutboundAction::RemoteStopTransaction,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}
