//! OCPP 1.6J gateway binary.
//!
//! Reads configuration from a TOML file (~/.config/ocpp-gateway/config.toml
//! or `OCPP_CONFIG`), with `HEARTBEAT_TIMEOUT_MS` overriding the heartbeat
//! timeout.

use std::sync::Arc;

use tracing::info;

use ocpp_gateway::config::AppConfig;
use ocpp_gateway::infrastructure::MemoryStore;
use ocpp_gateway::{init_tracing, ServerHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    info!(
        ws = %config.server.ws_address(),
        api = %config.server.api_address(),
        heartbeat_timeout_ms = config.heartbeat.timeout_ms,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::with_demo_data());
    let handle = ServerHandle::start(config, store).await?;
    handle.install_signal_handler();

    info!("Press Ctrl+C to stop");
    handle.wait().await;

    Ok(())
}
