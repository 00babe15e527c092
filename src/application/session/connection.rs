//! WebSocket connection handle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::application::commands::{CallCorrelator, CommandError};
use crate::config::CallConfig;
use crate::shared::OcppFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why the gateway closed a connection from its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered under the same charge point id
    Replaced,
    /// Too many consecutive malformed frames
    MalformedFrames,
    /// Server shutdown
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replaced => "replaced by a newer connection",
            Self::MalformedFrames => "too many malformed frames",
            Self::Shutdown => "server shutdown",
        }
    }
}

/// Instructions for the connection's socket writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(String),
    Close(CloseReason),
}

/// Handle to a live charge point connection.
///
/// Cloning is cheap; every clone feeds the same socket writer and shares
/// the same [`CallCorrelator`].
#[derive(Clone)]
pub struct Connection {
    /// Unique identifier for this connection instance
    pub connection_id: u64,
    pub charge_point_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Outbound>,
    correlator: Arc<CallCorrelator>,
}

impl Connection {
    pub fn new(
        charge_point_id: impl Into<String>,
        sender: mpsc::UnboundedSender<Outbound>,
        calls: &CallConfig,
    ) -> Self {
        let charge_point_id = charge_point_id.into();
        let correlator = Arc::new(CallCorrelator::new(
            charge_point_id.clone(),
            sender.clone(),
            calls,
        ));
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            charge_point_id,
            connected_at: Utc::now(),
            sender,
            correlator,
        }
    }

    /// Queue a frame for the socket writer.
    pub fn send_frame(&self, frame: &OcppFrame) -> Result<(), CommandError> {
        self.sender
            .send(Outbound::Frame(frame.serialize()))
            .map_err(|_| CommandError::ConnectionClosed)
    }

    /// Fail outstanding calls and ask the writer to close the socket.
    pub fn close(&self, reason: CloseReason) {
        self.correlator.close();
        let _ = self.sender.send(Outbound::Close(reason));
    }

    /// `true` once the socket writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn correlator(&self) -> &CallCorrelator {
        &self.correlator
    }

    /// Send a Call to the charge point and wait for its response.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, CommandError> {
        self.correlator.call(action, payload).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.connection_id)
            .field("charge_point_id", &self.charge_point_id)
            .field("connected_at", &self.connected_at)
            .field("pending_calls", &self.correlator.pending_count())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new("CP001", tx, &CallConfig::default());
        (conn, rx)
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _rx_a) = make_connection();
        let (b, _rx_b) = make_connection();
        assert_ne!(a.connection_id, b.connection_id);
        assert_eq!(a.charge_point_id, "CP001");
    }

    #[test]
    fn send_frame_delivers_wire_text() {
        let (conn, mut rx) = make_connection();
        conn.send_frame(&OcppFrame::CallResult {
            unique_id: "1".into(),
            payload: serde_json::json!({}),
        })
        .unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(r#"[3,"1",{}]"#.into()));
    }

    #[test]
    fn send_to_closed_channel_returns_error() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(conn.is_closed());
        let frame = OcppFrame::error_response("1", "GenericError", "");
        assert!(matches!(
            conn.send_frame(&frame),
            Err(CommandError::ConnectionClosed)
        ));
    }

    #[test]
    fn close_notifies_writer() {
        let (conn, mut rx) = make_connection();
        conn.close(CloseReason::Replaced);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(CloseReason::Replaced));
        assert!(conn.correlator().is_closed());
    }
}
