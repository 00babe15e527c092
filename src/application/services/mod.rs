//! Application services

mod heartbeat_monitor;

pub use heartbeat_monitor::{ConnectionStats, HeartbeatMonitor};
