//! StopTransaction handler
//!
//! Closes the transaction, prices the consumed energy and debits the
//! driver's wallet. A wallet that cannot cover the cost leaves the
//! transaction unsettled; the charge point is still answered normally.
//! Retransmitted stops are answered again without charging twice.

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use serde_json::Value;
use tracing::{info, warn};

use super::handle_authorize::{authorization_status, id_tag_info};
use super::{parse_payload, to_payload, wire_name, InboundAction};
use crate::application::events::{Event, TransactionStoppedEvent};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::application::ports::StoreError;
use crate::domain::TransactionStop;

pub async fn handle_stop_transaction(
    handler: &OcppHandler,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let req: StopTransactionRequest = parse_payload(InboundAction::StopTransaction, payload)?;
    let reason = req.reason.as_ref().map(wire_name);

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        transaction_id = req.transaction_id,
        meter_stop = req.meter_stop,
        reason = ?reason,
        "StopTransaction"
    );

    let ctx = &handler.ctx;

    // Authorized before any write.
    let id_tag_info = match &req.id_tag {
        Some(id_tag) => {
            let authorization = ctx.store.authorize(id_tag).await?;
            Some(id_tag_info(authorization_status(authorization.status)))
        }
        None => None,
    };

    let stop = TransactionStop {
        transaction_id: req.transaction_id,
        charge_point_id: handler.charge_point_id.clone(),
        meter_stop: req.meter_stop,
        stopped_at: req.timestamp,
        reason: reason.clone(),
    };

    let transaction = match ctx.store.record_transaction_stop(stop).await {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            warn!(
                charge_point_id = handler.charge_point_id.as_str(),
                transaction_id = req.transaction_id,
                "StopTransaction for unknown transaction"
            );
            return to_payload(&StopTransactionResponse { id_tag_info: None });
        }
        Err(StoreError::AlreadyStopped(transaction_id)) => {
            info!(
                charge_point_id = handler.charge_point_id.as_str(),
                transaction_id,
                "Repeated StopTransaction, already stopped"
            );
            return to_payload(&StopTransactionResponse { id_tag_info });
        }
        Err(e) => return Err(e.into()),
    };

    let cost = transaction.cost_at(ctx.config.billing.price_per_kwh);
    let settled = match &transaction.driver_id {
        Some(driver_id) => match ctx.store.adjust_wallet(driver_id, -cost).await {
            Ok(balance) => {
                info!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    transaction_id = transaction.id,
                    driver_id = driver_id.as_str(),
                    %cost,
                    %balance,
                    currency = ctx.config.billing.currency.as_str(),
                    "Transaction settled"
                );
                true
            }
            Err(StoreError::InsufficientFunds { balance, requested }) => {
                warn!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    transaction_id = transaction.id,
                    driver_id = driver_id.as_str(),
                    %balance,
                    %requested,
                    "Insufficient funds, transaction left unsettled"
                );
                false
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    transaction_id = transaction.id,
                    driver_id = driver_id.as_str(),
                    "Driver has no wallet, transaction left unsettled"
                );
                false
            }
            Err(e) => return Err(e.into()),
        },
        None => false,
    };
    ctx.store
        .settle_transaction(transaction.id, cost, settled)
        .await?;

    ctx.event_bus
        .publish(Event::TransactionStopped(TransactionStoppedEvent {
            charge_point_id: handler.charge_point_id.clone(),
            transaction_id: transaction.id,
            energy_wh: transaction.energy_consumed().unwrap_or(0),
            cost,
            settled,
            reason,
        }));

    to_payload(&StopTransactionResponse { id_tag_info })
}
