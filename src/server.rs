//! Gateway server runtime.
//!
//! [`ServerHandle`] owns the full lifecycle: metrics recorder, OCPP
//! WebSocket server, HTTP server, heartbeat monitor and graceful shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::{
    create_event_bus, CommandDispatcher, GatewayContext, GatewayStore, HeartbeatMonitor,
    SessionRegistry, SharedEventBus, SharedGatewayContext,
};
use crate::config::{AppConfig, LogFormat};
use crate::interfaces::http::{create_api_router, ApiState};
use crate::interfaces::ws::OcppServer;
use crate::shared::{ShutdownCoordinator, ShutdownSignal};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The global metrics recorder can only be installed once per process.
static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn prometheus_handle() -> Result<PrometheusHandle, BoxError> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus metrics recorder installed");
    Ok(PROM_HANDLE.get_or_init(|| handle).clone())
}

/// Handle to a running gateway.
pub struct ServerHandle {
    pub ctx: SharedGatewayContext,
    /// Sends Reset / RemoteStart / RemoteStop / ChangeConfiguration.
    pub command_dispatcher: Arc<CommandDispatcher>,
    pub heartbeat_monitor: Arc<HeartbeatMonitor>,
    pub event_bus: SharedEventBus,
    /// Bound WebSocket address.
    pub ws_addr: SocketAddr,
    /// Bound HTTP address.
    pub api_addr: SocketAddr,

    shutdown: ShutdownCoordinator,
    ws_task: JoinHandle<()>,
    api_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bind both listeners and start every component.
    pub async fn start(config: AppConfig, store: Arc<dyn GatewayStore>) -> Result<Self, BoxError> {
        info!("Starting OCPP gateway...");
        let prometheus = prometheus_handle()?;

        let event_bus = create_event_bus();
        let config = Arc::new(config);
        let ctx = GatewayContext::new(
            SessionRegistry::shared(),
            store,
            event_bus.clone(),
            config.clone(),
        )
        .shared();
        let command_dispatcher = Arc::new(CommandDispatcher::new(ctx.registry.clone()));

        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
        let shutdown_signal = shutdown.signal();

        // ── Heartbeat monitor ──────────────────────────────────
        let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(ctx.clone()));
        let monitor_task = heartbeat_monitor.clone().start(shutdown_signal.clone());

        // ── OCPP WebSocket server ──────────────────────────────
        let ws_listener = TcpListener::bind(config.server.ws_address()).await?;
        let ws_addr = ws_listener.local_addr()?;
        let server = OcppServer::new(ctx.clone()).with_shutdown(shutdown_signal.clone());
        let ws_task = tokio::spawn(async move {
            if let Err(e) = server.serve(ws_listener).await {
                error!("WebSocket server error: {}", e);
            }
        });

        // ── HTTP server ────────────────────────────────────────
        let api_listener = TcpListener::bind(config.server.api_address()).await?;
        let api_addr = api_listener.local_addr()?;
        let router = create_api_router(ApiState {
            session_registry: ctx.registry.clone(),
            metrics: prometheus,
            ws_address: ws_addr.to_string(),
            started_at: Arc::new(Instant::now()),
        });
        info!("HTTP server listening on http://{}", api_addr);

        let api_shutdown = shutdown_signal.clone();
        let api_server = axum::serve(
            api_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            api_shutdown.wait().await;
            info!("HTTP server received shutdown signal");
        });
        let api_task = tokio::spawn(async move {
            if let Err(e) = api_server.await {
                error!("HTTP server error: {}", e);
            }
        });

        info!("All servers started");

        Ok(Self {
            ctx,
            command_dispatcher,
            heartbeat_monitor,
            event_bus,
            ws_addr,
            api_addr,
            shutdown,
            ws_task,
            api_task,
            monitor_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for shutdown to be triggered and every task to stop.
    pub async fn wait(self) {
        self.shutdown.signal().wait().await;

        let Self {
            shutdown,
            ws_task,
            api_task,
            monitor_task,
            ..
        } = self;

        let completed = shutdown
            .run_cleanup(async move {
                for (name, task) in [
                    ("WebSocket server", ws_task),
                    ("HTTP server", api_task),
                    ("Heartbeat monitor", monitor_task),
                ] {
                    match task.await {
                        Ok(()) => info!("{} stopped", name),
                        Err(e) => error!("{} task panicked: {}", name, e),
                    }
                }
            })
            .await;

        if completed {
            info!("OCPP gateway shutdown complete");
        }
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("Shutting down OCPP gateway...");
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.ws_task.is_finished() || !self.api_task.is_finished()
    }
}

/// Initialize tracing from the application config.
///
/// `RUST_LOG` takes precedence over `logging.level`.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
