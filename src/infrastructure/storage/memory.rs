//! In-memory store for development and testing

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::application::ports::{GatewayStore, MeterReading, StoreError, StoreResult};
use crate::domain::{
    Authorization, ChargePointStatus, IdTag, NewTransaction, Transaction, TransactionStatus,
    TransactionStop,
};

/// One recorded status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub status: ChargePointStatus,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory [`GatewayStore`]
pub struct MemoryStore {
    id_tags: DashMap<String, IdTag>,
    wallets: DashMap<String, Decimal>,
    transactions: DashMap<i32, Transaction>,
    statuses: DashMap<String, Vec<StatusRecord>>,
    readings: DashMap<String, Vec<MeterReading>>,
    transaction_counter: AtomicI32,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            id_tags: DashMap::new(),
            wallets: DashMap::new(),
            transactions: DashMap::new(),
            statuses: DashMap::new(),
            readings: DashMap::new(),
            transaction_counter: AtomicI32::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Store with a couple of funded demo drivers.
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        store.add_driver("driver-1", "TEST001", Decimal::new(5000, 2));
        store.add_driver("driver-2", "TEST002", Decimal::new(1000, 2));
        store
    }

    /// Register a driver owning `id_tag` with an opening balance.
    pub fn add_driver(&self, driver_id: &str, id_tag: &str, balance: Decimal) {
        self.wallets.insert(driver_id.to_string(), balance);
        self.id_tags
            .insert(id_tag.to_string(), IdTag::new(id_tag, driver_id));
    }

    pub fn add_id_tag(&self, tag: IdTag) {
        self.wallets.entry(tag.driver_id.clone()).or_insert(Decimal::ZERO);
        self.id_tags.insert(tag.id_tag.clone(), tag);
    }

    /// Toggle availability; an unavailable store fails every call.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn transaction(&self, id: i32) -> Option<Transaction> {
        self.transactions.get(&id).map(|t| t.clone())
    }

    pub fn status_history(&self, charge_point_id: &str) -> Vec<StatusRecord> {
        self.statuses
            .get(charge_point_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn last_status(&self, charge_point_id: &str) -> Option<ChargePointStatus> {
        self.statuses
            .get(charge_point_id)
            .and_then(|h| h.last().map(|r| r.status))
    }

    pub fn meter_readings(&self, charge_point_id: &str) -> Vec<MeterReading> {
        self.readings
            .get(charge_point_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn save_status(
        &self,
        charge_point_id: &str,
        status: ChargePointStatus,
    ) -> StoreResult<()> {
        self.ensure_available()?;
        self.statuses
            .entry(charge_point_id.to_string())
            .or_default()
            .push(StatusRecord {
                status,
                recorded_at: Utc::now(),
            });
        Ok(())
    }

    async fn authorize(&self, id_tag: &str) -> StoreResult<Authorization> {
        self.ensure_available()?;
        let Some(tag) = self.id_tags.get(id_tag) else {
            return Ok(Authorization::invalid());
        };
        Ok(Authorization {
            status: tag.auth_status(Utc::now()),
            driver_id: Some(tag.driver_id.clone()),
        })
    }

    async fn record_transaction_start(
        &self,
        transaction: NewTransaction,
    ) -> StoreResult<Transaction> {
        self.ensure_available()?;
        let id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let record = Transaction::open(id, transaction);
        self.transactions.insert(id, record.clone());
        debug!(transaction_id = id, "Transaction recorded");
        Ok(record)
    }

    async fn record_transaction_stop(&self, stop: TransactionStop) -> StoreResult<Transaction> {
        self.ensure_available()?;
        let mut record = self
            .transactions
            .get_mut(&stop.transaction_id)
            .filter(|tx| tx.charge_point_id == stop.charge_point_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: stop.transaction_id.to_string(),
            })?;
        if !record.is_active() {
            return Err(StoreError::AlreadyStopped(stop.transaction_id));
        }
        record.stop(&stop);
        Ok(record.clone())
    }

    async fn settle_transaction(
        &self,
        transaction_id: i32,
        cost: Decimal,
        settled: bool,
    ) -> StoreResult<()> {
        self.ensure_available()?;
        let mut record = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;
        record.cost = Some(cost);
        record.status = if settled {
            TransactionStatus::Settled
        } else {
            TransactionStatus::Unsettled
        };
        Ok(())
    }

    async fn record_meter_values(&self, readings: Vec<MeterReading>) -> StoreResult<()> {
        self.ensure_available()?;
        for reading in readings {
            self.readings
                .entry(reading.charge_point_id.clone())
                .or_default()
                .push(reading);
        }
        Ok(())
    }

    async fn wallet_balance(&self, driver_id: &str) -> StoreResult<Decimal> {
        self.ensure_available()?;
        self.wallets
            .get(driver_id)
            .map(|b| *b)
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: driver_id.to_string(),
            })
    }

    async fn adjust_wallet(&self, driver_id: &str, delta: Decimal) -> StoreResult<Decimal> {
        self.ensure_available()?;
        let mut balance = self
            .wallets
            .get_mut(driver_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: driver_id.to_string(),
            })?;

        let updated = *balance + delta;
        if updated < Decimal::ZERO {
            return Err(StoreError::InsufficientFunds {
                balance: *balance,
                requested: -delta,
            });
        }
        *balance = updated;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IdTagStatus;

    fn new_transaction(id_tag: &str) -> NewTransaction {
        NewTransaction {
            charge_point_id: "CP1".into(),
            connector_id: 1,
            id_tag: id_tag.into(),
            driver_id: Some("driver-1".into()),
            meter_start: 1000,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn authorize_known_and_unknown_tags() {
        let store = MemoryStore::with_demo_data();

        let known = store.authorize("TEST001").await.unwrap();
        assert_eq!(known.status, IdTagStatus::Accepted);
        assert_eq!(known.driver_id.as_deref(), Some("driver-1"));

        let unknown = store.authorize("NOPE").await.unwrap();
        assert_eq!(unknown, Authorization::invalid());
    }

    #[tokio::test]
    async fn blocked_tag_is_reported() {
        let store = MemoryStore::new();
        let mut tag = IdTag::new("BAD", "driver-9");
        tag.blocked = true;
        store.add_id_tag(tag);

        assert_eq!(store.authorize("BAD").await.unwrap().status, IdTagStatus::Blocked);
        assert_eq!(store.wallet_balance("driver-9").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn transaction_ids_increment() {
        let store = MemoryStore::new();
        let a = store.record_transaction_start(new_transaction("T")).await.unwrap();
        let b = store.record_transaction_start(new_transaction("T")).await.unwrap();
        assert_eq!(b.id, a.id + 1);
        assert!(store.transaction(a.id).unwrap().is_active());
    }

    #[tokio::test]
    async fn stop_and_settle_transaction() {
        let store = MemoryStore::new();
        let tx = store.record_transaction_start(new_transaction("T")).await.unwrap();

        let stopped = store
            .record_transaction_stop(TransactionStop {
                transaction_id: tx.id,
                charge_point_id: "CP1".into(),
                meter_stop: 3000,
                stopped_at: Utc::now(),
                reason: Some("Local".into()),
            })
            .await
            .unwrap();
        assert_eq!(stopped.energy_consumed(), Some(2000));
        assert_eq!(stopped.status, TransactionStatus::Stopped);

        store
            .settle_transaction(tx.id, Decimal::new(50, 2), false)
            .await
            .unwrap();
        let record = store.transaction(tx.id).unwrap();
        assert_eq!(record.status, TransactionStatus::Unsettled);
        assert_eq!(record.cost, Some(Decimal::new(50, 2)));
    }

    #[tokio::test]
    async fn stopping_unknown_transaction_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .record_transaction_stop(TransactionStop {
                transaction_id: 99,
                charge_point_id: "CP1".into(),
                meter_stop: 0,
                stopped_at: Utc::now(),
                reason: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { entity: "transaction", .. })));
    }

    fn stop_of(transaction_id: i32, charge_point_id: &str) -> TransactionStop {
        TransactionStop {
            transaction_id,
            charge_point_id: charge_point_id.into(),
            meter_stop: 3000,
            stopped_at: Utc::now(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn second_stop_is_rejected_and_leaves_record_untouched() {
        let store = MemoryStore::new();
        let tx = store.record_transaction_start(new_transaction("T")).await.unwrap();

        store.record_transaction_stop(stop_of(tx.id, "CP1")).await.unwrap();
        store
            .settle_transaction(tx.id, Decimal::ONE, true)
            .await
            .unwrap();

        let mut again = stop_of(tx.id, "CP1");
        again.meter_stop = 9000;
        let result = store.record_transaction_stop(again).await;
        assert_eq!(result.unwrap_err(), StoreError::AlreadyStopped(tx.id));

        let record = store.transaction(tx.id).unwrap();
        assert_eq!(record.meter_stop, Some(3000));
        assert_eq!(record.status, TransactionStatus::Settled);
    }

    #[tokio::test]
    async fn stop_from_another_charge_point_is_not_found() {
        let store = MemoryStore::new();
        let tx = store.record_transaction_start(new_transaction("T")).await.unwrap();

        let result = store.record_transaction_stop(stop_of(tx.id, "CP2")).await;
        assert!(matches!(result, Err(StoreError::NotFound { entity: "transaction", .. })));
        assert!(store.transaction(tx.id).unwrap().is_active());
    }

    #[tokio::test]
    async fn wallet_never_goes_negative() {
        let store = MemoryStore::new();
        store.add_driver("d", "TAG", Decimal::new(100, 2));

        let balance = store.adjust_wallet("d", Decimal::new(-40, 2)).await.unwrap();
        assert_eq!(balance, Decimal::new(60, 2));

        let err = store.adjust_wallet("d", Decimal::new(-100, 2)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientFunds {
                balance: Decimal::new(60, 2),
                requested: Decimal::new(100, 2),
            }
        );
        assert_eq!(store.wallet_balance("d").await.unwrap(), Decimal::new(60, 2));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::with_demo_data();
        store.set_available(false);

        assert!(matches!(
            store.save_status("CP1", ChargePointStatus::Online).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.authorize("TEST001").await.is_err());

        store.set_available(true);
        store.save_status("CP1", ChargePointStatus::Online).await.unwrap();
        assert_eq!(store.last_status("CP1"), Some(ChargePointStatus::Online));
    }
}
