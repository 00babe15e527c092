pub mod outbound;

pub use outbound::{GatewayStore, MeterReading, StoreError, StoreResult};
