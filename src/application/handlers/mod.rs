//! Inbound OCPP message handling

mod error;
mod ocpp_handler;
pub mod ocpp_v16;

pub use error::HandlerError;
pub use ocpp_handler::OcppHandler;
pub use ocpp_v16::InboundAction;
