//! Authorize handler

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use super::{parse_payload, to_payload, InboundAction};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::domain::IdTagStatus;

pub(crate) fn authorization_status(status: IdTagStatus) -> AuthorizationStatus {
    match status {
        IdTagStatus::Accepted => AuthorizationStatus::Accepted,
        IdTagStatus::Blocked => AuthorizationStatus::Blocked,
        IdTagStatus::Expired => AuthorizationStatus::Expired,
        IdTagStatus::Invalid => AuthorizationStatus::Invalid,
    }
}

pub(crate) fn id_tag_info(status: AuthorizationStatus) -> IdTagInfo {
    IdTagInfo {
        status,
        expiry_date: None,
        parent_id_tag: None,
    }
}

pub async fn handle_authorize(handler: &OcppHandler, payload: &Value) -> Result<Value, HandlerError> {
    let req: AuthorizeRequest = parse_payload(InboundAction::Authorize, payload)?;

    let authorization = handler.ctx.store.authorize(&req.id_tag).await?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        id_tag = req.id_tag.as_str(),
        status = ?authorization.status,
        "Authorize"
    );

    to_payload(&AuthorizeResponse {
        id_tag_info: id_tag_info(authorization_status(authorization.status)),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::context::test_support::harness;
    use crate::domain::IdTag;

    #[tokio::test]
    async fn known_tag_is_accepted() {
        let h = harness("CP1");
        let handler = OcppHandler::new(h.connection.clone(), h.ctx.clone());

        let reply = handle_authorize(&handler, &json!({"idTag": "TAG1"})).await.unwrap();
        assert_eq!(reply["idTagInfo"]["status"], "Accepted");
    }

    #[tokio::test]
    async fn unknown_and_blocked_tags() {
        let h = harness("CP1");
        let mut blocked = IdTag::new("BLK", "driver-2");
        blocked.blocked = true;
        h.store.add_id_tag(blocked);
        let handler = OcppHandler::new(h.connection.clone(), h.ctx.clone());

        let reply = handle_authorize(&handler, &json!({"idTag": "WHO"})).await.unwrap();
        assert_eq!(reply["idTagInfo"]["status"], "Invalid");

        let reply = handle_authorize(&handler, &json!({"idTag": "BLK"})).await.unwrap();
        assert_eq!(reply["idTagInfo"]["status"], "Blocked");
    }
}
