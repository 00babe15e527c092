//! Outbound port for the persistence collaborator
//!
//! The gateway does not own durable state. Status history, transactions,
//! meter readings and wallet balances live in an external store reached
//! through [`GatewayStore`]. Implementations are expected to be
//! transactional per call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Authorization, ChargePointStatus, NewTransaction, Transaction, TransactionStop};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Transaction {0} already stopped")]
    AlreadyStopped(i32),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One sampled value from a MeterValues request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transaction_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub measurand: String,
    pub value: String,
    pub unit: Option<String>,
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Persist a charge point status transition.
    async fn save_status(&self, charge_point_id: &str, status: ChargePointStatus)
        -> StoreResult<()>;

    /// Look up an id tag. Unknown tags yield [`Authorization::invalid`].
    async fn authorize(&self, id_tag: &str) -> StoreResult<Authorization>;

    /// Open a transaction record and assign its id.
    async fn record_transaction_start(&self, transaction: NewTransaction)
        -> StoreResult<Transaction>;

    /// Close an active transaction record.
    ///
    /// A transaction owned by another charge point is [`StoreError::NotFound`];
    /// one that is no longer active is [`StoreError::AlreadyStopped`] and
    /// is left untouched.
    async fn record_transaction_stop(&self, stop: TransactionStop) -> StoreResult<Transaction>;

    /// Mark a stopped transaction as settled or unsettled at `cost`.
    async fn settle_transaction(
        &self,
        transaction_id: i32,
        cost: Decimal,
        settled: bool,
    ) -> StoreResult<()>;

    async fn record_meter_values(&self, readings: Vec<MeterReading>) -> StoreResult<()>;

    async fn wallet_balance(&self, driver_id: &str) -> StoreResult<Decimal>;

    /// Add `delta` (negative to debit) and return the new balance. A debit
    /// that would drive the balance below zero fails with
    /// [`StoreError::InsufficientFunds`] and leaves the balance untouched.
    async fn adjust_wallet(&self, driver_id: &str, delta: Decimal) -> StoreResult<Decimal>;
}
