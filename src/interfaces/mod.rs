//! Interfaces layer - the gateway's network surfaces

pub mod http;
pub mod ws;
