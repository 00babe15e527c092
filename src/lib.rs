//! # OCPP Gateway
//!
//! OCPP 1.6J central-system gateway: accepts charge-point WebSocket
//! connections, answers their requests, tracks liveness and lets operators
//! send remote commands.
//!
//! ## Architecture
//!
//! - **domain**: charge point status, id tags, transactions
//! - **application**: sessions, call correlation, action handlers,
//!   heartbeat monitor, commands, events
//! - **infrastructure**: in-memory storage adapter
//! - **interfaces**: OCPP WebSocket server and HTTP endpoints
//! - **shared**: OCPP-J frame codec and shutdown coordination

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};
pub use server::{init_tracing, ServerHandle};
