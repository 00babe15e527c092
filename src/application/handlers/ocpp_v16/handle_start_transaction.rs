//! StartTransaction handler

use rust_decimal::Decimal;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::AuthorizationStatus;
use serde_json::Value;
use tracing::{info, warn};

use super::handle_authorize::{authorization_status, id_tag_info};
use super::{parse_payload, to_payload, InboundAction};
use crate::application::events::{Event, TransactionStartedEvent};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::domain::NewTransaction;

fn refused(status: AuthorizationStatus) -> Result<Value, HandlerError> {
    to_payload(&StartTransactionResponse {
        transaction_id: 0,
        id_tag_info: id_tag_info(status),
    })
}

pub async fn handle_start_transaction(
    handler: &OcppHandler,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let req: StartTransactionRequest = parse_payload(InboundAction::StartTransaction, payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    let store = &handler.ctx.store;
    let authorization = store.authorize(&req.id_tag).await?;
    if !authorization.is_accepted() {
        warn!(
            charge_point_id = handler.charge_point_id.as_str(),
            id_tag = req.id_tag.as_str(),
            status = %authorization.status,
            "StartTransaction refused"
        );
        return refused(authorization_status(authorization.status));
    }

    if let Some(driver_id) = &authorization.driver_id {
        let balance = store.wallet_balance(driver_id).await?;
        if balance <= Decimal::ZERO {
            warn!(
                charge_point_id = handler.charge_point_id.as_str(),
                driver_id = driver_id.as_str(),
                %balance,
                "Wallet empty, blocking StartTransaction"
            );
            return refused(AuthorizationStatus::Blocked);
        }
    }

    let transaction = store
        .record_transaction_start(NewTransaction {
            charge_point_id: handler.charge_point_id.clone(),
            connector_id: req.connector_id,
            id_tag: req.id_tag.clone(),
            driver_id: authorization.driver_id.clone(),
            meter_start: req.meter_start,
            started_at: req.timestamp,
        })
        .await?;

    handler
        .ctx
        .event_bus
        .publish(Event::TransactionStarted(TransactionStartedEvent {
            charge_point_id: handler.charge_point_id.clone(),
            connector_id: req.connector_id,
            transaction_id: transaction.id,
            id_tag: req.id_tag.clone(),
            meter_start: req.meter_start,
        }));

    to_payload(&StartTransactionResponse {
        transaction_id: transaction.id,
        id_tag_info: id_tag_info(AuthorizationStatus::Accepted),
    })
}
