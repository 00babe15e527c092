//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::Measurand;
use serde_json::Value;
use tracing::info;

use super::{parse_payload, to_payload, wire_name, InboundAction};
use crate::application::events::{Event, MeterValuesEvent};
use crate::application::handlers::{HandlerError, OcppHandler};
use crate::application::ports::MeterReading;

pub async fn handle_meter_values(
    handler: &OcppHandler,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let req: MeterValuesRequest = parse_payload(InboundAction::MeterValues, payload)?;

    let readings: Vec<MeterReading> = req
        .meter_value
        .iter()
        .flat_map(|meter_value| {
            meter_value.sampled_value.iter().map(|sampled| MeterReading {
                charge_point_id: handler.charge_point_id.clone(),
                connector_id: req.connector_id,
                transaction_id: req.transaction_id,
                timestamp: meter_value.timestamp,
                measurand: wire_name(
                    sampled
                        .measurand
                        .as_ref()
                        .unwrap_or(&Measurand::EnergyActiveImportRegister),
                ),
                value: sampled.value.clone(),
                unit: sampled.unit.as_ref().map(wire_name),
            })
        })
        .collect();

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        samples = readings.len(),
        "MeterValues"
    );

    let samples = readings.len();
    handler.ctx.store.record_meter_values(readings).await?;

    handler
        .ctx
        .event_bus
        .publish(Event::MeterValuesReceived(MeterValuesEvent {
            charge_point_id: handler.charge_point_id.clone(),
            connector_id: req.connector_id,
            transaction_id: req.transaction_id,
            samples,
        }));

    to_payload(&MeterValuesResponse {})
}
