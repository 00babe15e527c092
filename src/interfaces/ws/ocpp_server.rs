//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/{charge_point_id}`
//! (or `/ocpp/{charge_point_id}`) with subprotocol `ocpp1.6`.
//!
//! Each connection runs in its own task. Inbound frames are read and
//! handled strictly in order; a separate writer task drains the
//! connection's outbound queue onto the socket.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::events::{ChargePointConnectedEvent, ChargePointDisconnectedEvent, Event};
use crate::application::handlers::OcppHandler;
use crate::application::session::{
    CloseReason, Connection, Outbound, StatusChange, UnregisterOutcome,
};
use crate::application::SharedGatewayContext;
use crate::shared::{ErrorCode, OcppFrame, ShutdownSignal, UNPARSABLE_MESSAGE_ID};

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Longest charge point identity accepted in the URL path.
const MAX_CHARGE_POINT_ID_LEN: usize = 48;

/// How long the writer gets to flush a close frame before it is dropped.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// OCPP WebSocket Server
pub struct OcppServer {
    ctx: SharedGatewayContext,
    shutdown_signal: Option<ShutdownSignal>,
}

impl OcppServer {
    pub fn new(ctx: SharedGatewayContext) -> Self {
        Self {
            ctx,
            shutdown_signal: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), BoxError> {
        let addr = self.ctx.config.server.ws_address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let addr = listener.local_addr()?;
        info!("OCPP 1.6 gateway listening on ws://{}", addr);
        info!(
            "   Charge points should connect to: ws://{}/{{charge_point_id}}",
            addr
        );

        let shutdown = self.shutdown_signal.clone().unwrap_or_default();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, shutdown.clone()),
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown.notified().wait() => {
                    info!("WebSocket server received shutdown signal");
                    self.graceful_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: ShutdownSignal) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, ctx, shutdown).await {
                warn!(remote_addr = %addr, error = %e, "Connection error");
            }
        });
    }

    fn graceful_shutdown(&self) {
        let count = self.ctx.registry.count_connected();
        if count > 0 {
            info!(count, "Closing charge point connections for shutdown");
        }
        self.ctx.registry.close_all(CloseReason::Shutdown);
    }
}

/// Extract charge point ID from WebSocket request path.
/// Expected format: /ocpp/{charge_point_id} or /{charge_point_id}
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_start_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

/// Identity rules: 1 to 48 characters from `[A-Za-z0-9._:-]`.
fn is_valid_charge_point_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CHARGE_POINT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

fn close_code(reason: CloseReason) -> CloseCode {
    match reason {
        CloseReason::Replaced | CloseReason::Shutdown => CloseCode::Away,
        CloseReason::MalformedFrames => CloseCode::Protocol,
    }
}

fn update_connected_gauge(ctx: &SharedGatewayContext) {
    metrics::gauge!("ocpp_sessions_connected").set(ctx.registry.count_connected() as f64);
}

/// Releases a registered session when its connection task ends, including
/// by panic or cancellation.
struct SessionGuard {
    ctx: SharedGatewayContext,
    connection: Connection,
    writer: Option<AbortHandle>,
    released: bool,
}

impl SessionGuard {
    fn new(ctx: SharedGatewayContext, connection: Connection) -> Self {
        Self {
            ctx,
            connection,
            writer: None,
            released: false,
        }
    }

    fn watch_writer(&mut self, writer: AbortHandle) {
        self.writer = Some(writer);
    }

    /// Fail pending calls and clear the registry handle. Runs once; the
    /// OFFLINE transition is returned for the caller to record.
    fn release(&mut self) -> Option<StatusChange> {
        if std::mem::replace(&mut self.released, true) {
            return None;
        }
        self.connection.correlator().close();
        let outcome = self.ctx.registry.unregister(
            &self.connection.charge_point_id,
            self.connection.connection_id,
        );
        update_connected_gauge(&self.ctx);
        match outcome {
            UnregisterOutcome::Removed(change) => change,
            UnregisterOutcome::Stale | UnregisterOutcome::Unknown => None,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        if self.released {
            return;
        }
        warn!(
            charge_point_id = self.connection.charge_point_id.as_str(),
            connection_id = self.connection.connection_id,
            "Connection task ended abruptly, releasing session"
        );
        let Some(change) = self.release() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let ctx = self.ctx.clone();
                runtime.spawn(async move { ctx.record_status_change(&change).await });
            }
            Err(_) => self.ctx.publish_status_change(&change),
        }
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: SharedGatewayContext,
    shutdown: ShutdownSignal,
) -> Result<(), BoxError> {
    debug!(remote_addr = %addr, "New TCP connection");

    let mut requested_id: Option<String> = None;

    let mut ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            debug!(remote_addr = %addr, path, "WebSocket handshake");

            let requested_protocols = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            let supports_ocpp16 = requested_protocols
                .split(',')
                .map(|s| s.trim())
                .any(|p| p == OCPP_SUBPROTOCOL);

            if supports_ocpp16 {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(OCPP_SUBPROTOCOL),
                );
            } else if !requested_protocols.is_empty() {
                warn!(
                    remote_addr = %addr,
                    requested = requested_protocols,
                    "Client does not offer ocpp1.6"
                );
            }

            requested_id = extract_charge_point_id(path);
            Ok(response)
        },
    )
    .await?;

    let charge_point_id = match requested_id {
        Some(id) if is_valid_charge_point_id(&id) => id,
        other => {
            warn!(remote_addr = %addr, requested = ?other, "Rejecting invalid charge point id");
            ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "invalid charge point identity".into(),
                }))
                .await?;
            return Ok(());
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let connection = Connection::new(charge_point_id.clone(), tx, &ctx.config.calls);
    let connection_id = connection.connection_id;
    let registered = ctx.registry.register(connection.clone());
    let mut session = SessionGuard::new(ctx.clone(), connection.clone());
    if let Some(change) = &registered.status_change {
        ctx.record_status_change(change).await;
    }
    update_connected_gauge(&ctx);

    info!(
        charge_point_id = charge_point_id.as_str(),
        connection_id,
        remote_addr = %addr,
        "Charge point connected"
    );
    ctx.event_bus
        .publish(Event::ChargePointConnected(ChargePointConnectedEvent {
            charge_point_id: charge_point_id.clone(),
            connection_id,
            remote_addr: Some(addr.to_string()),
            replaced_existing: registered.evicted.is_some(),
        }));

    // Outgoing frame writer
    let cp_id_send = charge_point_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    debug!(charge_point_id = cp_id_send.as_str(), frame = text.as_str(), "->");
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        warn!(charge_point_id = cp_id_send.as_str(), error = %e, "Send error");
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    info!(
                        charge_point_id = cp_id_send.as_str(),
                        reason = reason.as_str(),
                        "Closing connection"
                    );
                    let frame = CloseFrame {
                        code: close_code(reason),
                        reason: reason.as_str().into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });
    session.watch_writer(send_task.abort_handle());

    let handler = OcppHandler::new(connection.clone(), ctx.clone());
    let malformed_budget = ctx.config.connection.malformed_frame_budget;
    let mut malformed_in_a_row: u32 = 0;
    let mut close_queued = false;

    let reason: &'static str = loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!(charge_point_id = charge_point_id.as_str(), frame = text.as_str(), "<-");
                    if let Some(change) = ctx.registry.touch(&charge_point_id) {
                        ctx.record_status_change(&change).await;
                    }

                    match OcppFrame::parse(&text) {
                        Ok(frame) => {
                            malformed_in_a_row = 0;
                            metrics::counter!("ocpp_frames_received_total", "kind" => frame.kind())
                                .increment(1);
                            if let Some(reply) = handler.handle_frame(frame).await {
                                if connection.send_frame(&reply).is_err() {
                                    break "writer closed";
                                }
                            }
                        }
                        Err(e) => {
                            malformed_in_a_row += 1;
                            metrics::counter!("ocpp_malformed_frames_total").increment(1);
                            warn!(
                                charge_point_id = charge_point_id.as_str(),
                                error = %e,
                                consecutive = malformed_in_a_row,
                                "Malformed frame"
                            );
                            let reply = OcppFrame::error_response(
                                UNPARSABLE_MESSAGE_ID,
                                ErrorCode::FormationViolation.as_str(),
                                e.to_string(),
                            );
                            let _ = connection.send_frame(&reply);

                            if malformed_in_a_row > malformed_budget {
                                connection.close(CloseReason::MalformedFrames);
                                close_queued = true;
                                break CloseReason::MalformedFrames.as_str();
                            }
                        }
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(
                        charge_point_id = charge_point_id.as_str(),
                        bytes = data.len(),
                        "Binary message received, ignoring"
                    );
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    if let Some(change) = ctx.registry.touch(&charge_point_id) {
                        ctx.record_status_change(&change).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(charge_point_id = charge_point_id.as_str(), ?frame, "Close frame received");
                    break "closed by charge point";
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!(charge_point_id = charge_point_id.as_str(), error = %e, "WebSocket error");
                    break "websocket error";
                }
                None => break "stream ended",
            },
            _ = &mut send_task => break "writer finished",
            _ = shutdown.notified().wait() => {
                connection.close(CloseReason::Shutdown);
                close_queued = true;
                break CloseReason::Shutdown.as_str();
            }
        }
    };

    // Cleanup
    if let Some(change) = session.release() {
        ctx.record_status_change(&change).await;
    }

    if !send_task.is_finished() {
        if !close_queued
            || tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
                .await
                .is_err()
        {
            send_task.abort();
        }
    }

    ctx.event_bus
        .publish(Event::ChargePointDisconnected(ChargePointDisconnectedEvent {
            charge_point_id: charge_point_id.clone(),
            connection_id,
            reason: Some(reason.to_string()),
        }));

    info!(
        charge_point_id = charge_point_id.as_str(),
        connection_id, reason, "Charge point disconnected"
    );

    Ok(())
}
