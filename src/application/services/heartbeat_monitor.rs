//! Heartbeat Monitor Service
//!
//! Periodically flags connected charge points as OFFLINE when nothing has
//! been heard from them for longer than the heartbeat timeout. The
//! transition back happens on the next inbound frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::application::context::SharedGatewayContext;
use crate::application::session::StatusChange;
use crate::domain::ChargePointStatus;
use crate::shared::ShutdownSignal;

/// Heartbeat Monitor Service
pub struct HeartbeatMonitor {
    ctx: SharedGatewayContext,
    timeout: Duration,
    scan_interval: Duration,
    running: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(ctx: SharedGatewayContext) -> Self {
        let timeout = ctx.config.heartbeat.timeout();
        let scan_interval = ctx.config.heartbeat.scan_interval();
        Self {
            ctx,
            timeout,
            scan_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the heartbeat monitor background task
    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.running.store(true, Ordering::SeqCst);
            info!(
                timeout_ms = self.timeout.as_millis() as u64,
                scan_interval_ms = self.scan_interval.as_millis() as u64,
                "Heartbeat monitor started"
            );

            let mut interval = tokio::time::interval(self.scan_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.scan_at(Utc::now()).await;
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Heartbeat monitor shutting down");
                        break;
                    }
                }
            }

            self.running.store(false, Ordering::SeqCst);
            info!("Heartbeat monitor stopped");
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one scan as of `now`, returning the transitions it made.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Vec<StatusChange> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX / 1_000_000));
        let changes = self.ctx.registry.expire_stale(now, timeout);

        debug!(
            connected = self.ctx.registry.count_connected(),
            expired = changes.len(),
            "Heartbeat scan"
        );

        for change in &changes {
            info!(
                charge_point_id = change.charge_point_id.as_str(),
                "No message within heartbeat timeout, marking OFFLINE"
            );
            self.ctx.record_status_change(change).await;
        }
        changes
    }

    /// Counts by status across every known session.
    pub fn connection_stats(&self) -> ConnectionStats {
        let sessions = self.ctx.registry.sessions();
        let connected = sessions.iter().filter(|s| s.is_connected()).count();
        let offline = sessions
            .iter()
            .filter(|s| s.status == ChargePointStatus::Offline)
            .count();
        ConnectionStats {
            total: sessions.len(),
            connected,
            offline,
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub connected: usize,
    pub offline: usize,
}
