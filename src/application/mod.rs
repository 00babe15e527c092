pub mod commands;
pub mod context;
pub mod events;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod session;

// Re-export key types for convenience
pub use commands::{
    change_configuration, remote_start_transaction, remote_stop_transaction, reset,
    CallCorrelator, CommandDispatcher, CommandError, OutboundAction, ResetKind,
};
pub use context::{GatewayContext, SharedGatewayContext};
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use handlers::{HandlerError, InboundAction, OcppHandler};
pub use ports::{GatewayStore, MeterReading, StoreError, StoreResult};
pub use services::{ConnectionStats, HeartbeatMonitor};
pub use session::{Connection, SessionRegistry, SharedSessionRegistry};
