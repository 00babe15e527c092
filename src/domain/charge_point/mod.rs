//! Charge point status tracked by the gateway

pub mod model;

pub use model::ChargePointStatus;
