//! Change Configuration command

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use tracing::info;

use crate::application::session::SharedSessionRegistry;

use super::{send_command, CommandError, OutboundAction};

pub async fn change_configuration(
    registry: &SharedSessionRegistry,
    charge_point_id: &str,
    key: String,
    value: String,
) -> Result<String, CommandError> {
    info!(charge_point_id, key = key.as_str(), value = value.as_str(), "ChangeConfiguration");

    let request = ChangeConfigurationRequest { key, value };
    let response: ChangeConfigurationResponse = send_command(
        registry,
        charge_point_id,
        OutboundAction::ChangeConfiguration,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}
