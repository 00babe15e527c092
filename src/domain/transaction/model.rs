//! Transaction domain entity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Transaction status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    Active,
    /// Stopped by the charge point, not yet priced
    Stopped,
    /// Stopped and the cost was debited from the driver's wallet
    Settled,
    /// Stopped but the wallet could not cover the cost
    Unsettled,
}

/// Charging transaction
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i32,
    pub charge_point_id: String,
    pub connector_id: u32,
    /// ID tag that started the transaction
    pub id_tag: String,
    /// Driver owning the id tag, if known
    pub driver_id: Option<String>,
    /// Meter value at start (Wh)
    pub meter_start: i32,
    /// Meter value at stop (Wh)
    pub meter_stop: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub cost: Option<Decimal>,
    pub status: TransactionStatus,
}

/// Data needed to open a transaction record.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub driver_id: Option<String>,
    pub meter_start: i32,
    pub started_at: DateTime<Utc>,
}

/// Data needed to close a transaction record.
#[derive(Debug, Clone)]
pub struct TransactionStop {
    pub transaction_id: i32,
    /// Charge point reporting the stop; must own the transaction.
    pub charge_point_id: String,
    pub meter_stop: i32,
    pub stopped_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl Transaction {
    pub fn open(id: i32, new: NewTransaction) -> Self {
        Self {
            id,
            charge_point_id: new.charge_point_id,
            connector_id: new.connector_id,
            id_tag: new.id_tag,
            driver_id: new.driver_id,
            meter_start: new.meter_start,
            meter_stop: None,
            started_at: new.started_at,
            stopped_at: None,
            stop_reason: None,
            cost: None,
            status: TransactionStatus::Active,
        }
    }

    pub fn stop(&mut self, stop: &TransactionStop) {
        self.meter_stop = Some(stop.meter_stop);
        self.stopped_at = Some(stop.stopped_at);
        self.stop_reason = stop.reason.clone();
        self.status = TransactionStatus::Stopped;
    }

    /// Energy consumed in Wh. Meter rollbacks count as zero.
    pub fn energy_consumed(&self) -> Option<i64> {
        self.meter_stop
            .map(|stop| (i64::from(stop) - i64::from(self.meter_start)).max(0))
    }

    /// Cost of the consumed energy at `price_per_kwh`, rounded to cents.
    pub fn cost_at(&self, price_per_kwh: Decimal) -> Decimal {
        let wh = Decimal::from(self.energy_consumed().unwrap_or(0));
        (wh / Decimal::from(1000) * price_per_kwh).round_dp(2)
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }
}
