//! WebSocket interface
//!
//! - `ocpp_server`: OCPP 1.6 WebSocket server for charge points

pub mod ocpp_server;

pub use ocpp_server::OcppServer;
