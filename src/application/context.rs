//! Collaborators shared by every connection

use std::sync::Arc;

use tracing::{error, info};

use crate::application::events::{Event, SharedEventBus, StatusChangedEvent};
use crate::application::ports::GatewayStore;
use crate::application::session::{SharedSessionRegistry, StatusChange};
use crate::config::AppConfig;
use crate::domain::ChargePointStatus;

pub struct GatewayContext {
    pub registry: SharedSessionRegistry,
    pub store: Arc<dyn GatewayStore>,
    pub event_bus: SharedEventBus,
    pub config: Arc<AppConfig>,
}

pub type SharedGatewayContext = Arc<GatewayContext>;

impl GatewayContext {
    pub fn new(
        registry: SharedSessionRegistry,
        store: Arc<dyn GatewayStore>,
        event_bus: SharedEventBus,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            registry,
            store,
            event_bus,
            config,
        }
    }

    pub fn shared(self) -> SharedGatewayContext {
        Arc::new(self)
    }

    /// Announce a status transition to observers.
    pub fn publish_status_change(&self, change: &StatusChange) {
        if change.to == ChargePointStatus::Offline {
            metrics::counter!("ocpp_status_offline_total").increment(1);
        }
        info!(
            charge_point_id = change.charge_point_id.as_str(),
            from = %change.from,
            to = %change.to,
            "Status changed"
        );
        self.event_bus.publish(Event::StatusChanged(StatusChangedEvent {
            charge_point_id: change.charge_point_id.clone(),
            from: change.from,
            to: change.to,
        }));
    }

    /// Persist and announce a transition the gateway derived itself
    /// (timeouts, disconnects, reconnects). Store failures are logged.
    pub async fn record_status_change(&self, change: &StatusChange) {
        if let Err(e) = self
            .store
            .save_status(&change.charge_point_id, change.to)
            .await
        {
            error!(
                charge_point_id = change.charge_point_id.as_str(),
                status = %change.to,
                error = %e,
                "Failed to persist status"
            );
        }
        self.publish_status_change(change);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::events::create_event_bus;
    use crate::application::session::{Connection, Outbound, SessionRegistry};
    use crate::infrastructure::storage::MemoryStore;

    pub struct Harness {
        pub ctx: SharedGatewayContext,
        pub store: Arc<MemoryStore>,
        pub connection: Connection,
        pub outbound: mpsc::UnboundedReceiver<Outbound>,
    }

    /// Context with a funded driver ("driver-1", tag "TAG1", 10.00) and a
    /// registered connection for `charge_point_id`.
    pub fn harness_with(charge_point_id: &str, config: AppConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.add_driver("driver-1", "TAG1", Decimal::new(1000, 2));

        let ctx = GatewayContext::new(
            SessionRegistry::shared(),
            store.clone(),
            create_event_bus(),
            Arc::new(config),
        )
        .shared();

        let (tx, outbound) = mpsc::unbounded_channel();
        let connection = Connection::new(charge_point_id, tx, &ctx.config.calls);
        ctx.registry.register(connection.clone());

        Harness {
            ctx,
            store,
            connection,
            outbound,
        }
    }

    pub fn harness(charge_point_id: &str) -> Harness {
        harness_with(charge_point_id, AppConfig::default())
    }
}
