//! Charge point sessions and their live connections

pub mod connection;
pub mod registry;

pub use connection::{CloseReason, Connection, Outbound};
pub use registry::{
    RegisterResult, SessionRegistry, SessionSnapshot, SharedSessionRegistry, StatusChange,
    UnregisterOutcome,
};
