//! Gateway events
//!
//! Everything observers (dashboards, audit sinks) can learn about charge
//! points without talking to the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::ChargePointStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ChargePointConnected(ChargePointConnectedEvent),
    ChargePointDisconnected(ChargePointDisconnectedEvent),
    StatusChanged(StatusChangedEvent),
    TransactionStarted(TransactionStartedEvent),
    TransactionStopped(TransactionStoppedEvent),
    MeterValuesReceived(MeterValuesEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ChargePointConnected(_) => "charge_point_connected",
            Event::ChargePointDisconnected(_) => "charge_point_disconnected",
            Event::StatusChanged(_) => "status_changed",
            Event::TransactionStarted(_) => "transaction_started",
            Event::TransactionStopped(_) => "transaction_stopped",
            Event::MeterValuesReceived(_) => "meter_values_received",
        }
    }

    pub fn charge_point_id(&self) -> &str {
        match self {
            Event::ChargePointConnected(e) => &e.charge_point_id,
            Event::ChargePointDisconnected(e) => &e.charge_point_id,
            Event::StatusChanged(e) => &e.charge_point_id,
            Event::TransactionStarted(e) => &e.charge_point_id,
            Event::TransactionStopped(e) => &e.charge_point_id,
            Event::MeterValuesReceived(e) => &e.charge_point_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargePointConnectedEvent {
    pub charge_point_id: String,
    pub connection_id: u64,
    pub remote_addr: Option<String>,
    /// A previous live connection was evicted by this one
    pub replaced_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargePointDisconnectedEvent {
    pub charge_point_id: String,
    pub connection_id: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChangedEvent {
    pub charge_point_id: String,
    pub from: ChargePointStatus,
    pub to: ChargePointStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionStartedEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transaction_id: i32,
    pub id_tag: String,
    pub meter_start: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionStoppedEvent {
    pub charge_point_id: String,
    pub transaction_id: i32,
    pub energy_wh: i64,
    pub cost: Decimal,
    pub settled: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeterValuesEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transaction_id: Option<i32>,
    pub samples: usize,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
