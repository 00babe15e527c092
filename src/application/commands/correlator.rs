//! Per-connection call correlation
//!
//! Every gateway-initiated Call gets a fresh unique id and a pending entry.
//! The entry is completed by the matching CallResult/CallError, by the
//! per-call timeout, or by the connection closing; whichever comes first
//! removes it, so a late response finds nothing and is logged as orphaned.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::application::session::Outbound;
use crate::config::{CallConfig, OverflowPolicy};
use crate::shared::OcppFrame;

use super::CommandError;

type Resolver = oneshot::Sender<Result<Value, CommandError>>;

struct PendingCall {
    action: String,
    issued_at: Instant,
    resolver: Resolver,
}

#[derive(Default)]
struct CorrelatorState {
    pending: HashMap<String, PendingCall>,
    closed: bool,
}

/// Drops the pending entry when the waiting caller goes away before the
/// call completes (task aborted, outer timeout).
struct PendingGuard<'a> {
    correlator: &'a CallCorrelator,
    unique_id: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.correlator.state().pending.remove(self.unique_id).is_some() {
            debug!(
                charge_point_id = self.correlator.charge_point_id.as_str(),
                unique_id = self.unique_id,
                "Caller gave up, pending call dropped"
            );
        }
    }
}

/// Tracks outstanding Calls sent to one charge point.
pub struct CallCorrelator {
    charge_point_id: String,
    sender: mpsc::UnboundedSender<Outbound>,
    state: Mutex<CorrelatorState>,
    slots: std::sync::Arc<Semaphore>,
    policy: OverflowPolicy,
    timeout: Duration,
}

impl CallCorrelator {
    pub fn new(
        charge_point_id: String,
        sender: mpsc::UnboundedSender<Outbound>,
        calls: &CallConfig,
    ) -> Self {
        Self {
            charge_point_id,
            sender,
            state: Mutex::new(CorrelatorState::default()),
            slots: std::sync::Arc::new(Semaphore::new(calls.max_in_flight.max(1))),
            policy: calls.overflow_policy,
            timeout: calls.timeout(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a Call with a fresh unique id and wait for its outcome.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, CommandError> {
        let _permit = self.acquire_slot().await?;

        let (unique_id, rx) = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            match self.register(&candidate, action) {
                Err(CommandError::DuplicateMessageId(_)) => continue,
                other => break (candidate, other?),
            }
        };

        self.transmit_and_wait(unique_id, action, payload, rx).await
    }

    /// Send a Call under a caller-chosen unique id.
    ///
    /// Fails with [`CommandError::DuplicateMessageId`] if that id is
    /// still pending on this connection.
    pub async fn call_with_id(
        &self,
        unique_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let _permit = self.acquire_slot().await?;
        let rx = self.register(unique_id, action)?;
        self.transmit_and_wait(unique_id.to_string(), action, payload, rx)
            .await
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, CommandError> {
        match self.policy {
            OverflowPolicy::Queue => self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CommandError::ConnectionClosed),
            OverflowPolicy::Reject => match self.slots.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(CommandError::Busy),
                Err(TryAcquireError::Closed) => Err(CommandError::ConnectionClosed),
            },
        }
    }

    fn register(
        &self,
        unique_id: &str,
        action: &str,
    ) -> Result<oneshot::Receiver<Result<Value, CommandError>>, CommandError> {
        let mut state = self.state();
        if state.closed {
            return Err(CommandError::ConnectionClosed);
        }
        if state.pending.contains_key(unique_id) {
            return Err(CommandError::DuplicateMessageId(unique_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            unique_id.to_string(),
            PendingCall {
                action: action.to_string(),
                issued_at: Instant::now(),
                resolver: tx,
            },
        );
        Ok(rx)
    }

    async fn transmit_and_wait(
        &self,
        unique_id: String,
        action: &str,
        payload: Value,
        rx: oneshot::Receiver<Result<Value, CommandError>>,
    ) -> Result<Value, CommandError> {
        let mut guard = PendingGuard {
            correlator: self,
            unique_id: &unique_id,
            armed: true,
        };

        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        if self.sender.send(Outbound::Frame(frame.serialize())).is_err() {
            // guard removes the entry
            return Err(CommandError::ConnectionClosed);
        }

        metrics::counter!("ocpp_calls_sent_total", "action" => action.to_string()).increment(1);
        info!(
            charge_point_id = self.charge_point_id.as_str(),
            action,
            unique_id = unique_id.as_str(),
            "Call sent"
        );

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        guard.disarm();

        match outcome {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without an answer
            Ok(Err(_)) => Err(CommandError::ConnectionClosed),
            Err(_) => {
                self.state().pending.remove(&unique_id);
                metrics::counter!("ocpp_call_timeouts_total").increment(1);
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    unique_id = unique_id.as_str(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(CommandError::Timeout(self.timeout))
            }
        }
    }

    /// Complete the pending call answered by `frame`.
    ///
    /// Returns `false` for Calls and for responses nobody is waiting for.
    pub fn resolve(&self, frame: OcppFrame) -> bool {
        let (unique_id, outcome) = match frame {
            OcppFrame::CallResult { unique_id, payload } => (unique_id, Ok(payload)),
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => (
                unique_id,
                Err(CommandError::Remote {
                    code: error_code,
                    description: error_description,
                }),
            ),
            OcppFrame::Call { .. } => return false,
        };

        let pending = self.state().pending.remove(&unique_id);
        match pending {
            Some(call) => {
                debug!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action = call.action.as_str(),
                    unique_id = unique_id.as_str(),
                    elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Response correlated"
                );
                // The caller may have given up already.
                let _ = call.resolver.send(outcome);
                true
            }
            None => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    unique_id = unique_id.as_str(),
                    "Orphaned response, no pending call"
                );
                false
            }
        }
    }

    /// Fail every pending call with [`CommandError::ConnectionClosed`] and
    /// refuse new ones.
    pub fn close(&self) {
        let drained: Vec<(String, PendingCall)> = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.drain().collect()
        };
        self.slots.close();

        if !drained.is_empty() {
            info!(
                charge_point_id = self.charge_point_id.as_str(),
                failed = drained.len(),
                "Failing pending calls on close"
            );
        }
        for (_, call) in drained {
            let _ = call.resolver.send(Err(CommandError::ConnectionClosed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_pending(&self, unique_id: &str) -> bool {
        self.state().pending.contains_key(unique_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn correlator(calls: CallConfig) -> (Arc<CallCorrelator>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(CallCorrelator::new("CP1".into(), tx, &calls)), rx)
    }

    fn sent_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> OcppFrame {
        match rx.try_recv().expect("no frame sent") {
            Outbound::Frame(text) => OcppFrame::parse(&text).unwrap(),
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    async fn wait_for_pending(c: &CallCorrelator, n: usize) {
        while c.pending_count() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_pending_entry() {
        let (c, mut rx) = correlator(CallConfig::default());

        let result = c.call_with_id("r1", "Reset", json!({"type": "Soft"})).await;

        assert!(matches!(result, Err(CommandError::Timeout(d)) if d == Duration::from_secs(30)));
        assert_eq!(c.pending_count(), 0);
        assert_eq!(sent_frame(&mut rx).unique_id(), "r1");

        // A late answer is an orphan
        assert!(!c.resolve(OcppFrame::CallResult {
            unique_id: "r1".into(),
            payload: json!({"status": "Accepted"}),
        }));
    }

    #[tokio::test]
    async fn abandoned_call_removes_pending_entry() {
        let (c, mut rx) = correlator(CallConfig::default());

        let caller = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("gone", "Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;
        assert_eq!(sent_frame(&mut rx).unique_id(), "gone");

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        assert_eq!(c.pending_count(), 0);
        assert!(!c.resolve(OcppFrame::CallResult {
            unique_id: "gone".into(),
            payload: json!({"status": "Accepted"}),
        }));

        // The slot is free again.
        let next = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("next", "Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;
        assert!(c.is_pending("next"));
        next.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn outer_timeout_removes_pending_entry() {
        let (c, _rx) = correlator(CallConfig::default());

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            c.call_with_id("short", "Reset", json!({})),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn responses_resolve_out_of_order() {
        let calls = CallConfig {
            max_in_flight: 2,
            ..CallConfig::default()
        };
        let (c, mut rx) = correlator(calls);

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("a1", "Reset", json!({})).await }
        });
        let second = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("a2", "Reset", json!({})).await }
        });
        wait_for_pending(&c, 2).await;

        assert!(c.resolve(OcppFrame::CallResult {
            unique_id: "a2".into(),
            payload: json!({"n": 2}),
        }));
        assert!(c.resolve(OcppFrame::CallResult {
            unique_id: "a1".into(),
            payload: json!({"n": 1}),
        }));

        assert_eq!(first.await.unwrap().unwrap(), json!({"n": 1}));
        assert_eq!(second.await.unwrap().unwrap(), json!({"n": 2}));
        assert_eq!(c.pending_count(), 0);

        sent_frame(&mut rx);
        sent_frame(&mut rx);
    }

    #[tokio::test(start_paused = true)]
    async fn call_error_is_surfaced() {
        let (c, mut rx) = correlator(CallConfig::default());

        let task = tokio::spawn({
            let c = c.clone();
            async move { c.call("ChangeConfiguration", json!({"key": "k", "value": "v"})).await }
        });
        wait_for_pending(&c, 1).await;
        let id = sent_frame(&mut rx).unique_id().to_string();

        c.resolve(OcppFrame::error_response(id, "NotSupported", "nope"));

        match task.await.unwrap() {
            Err(CommandError::Remote { code, description }) => {
                assert_eq!(code, "NotSupported");
                assert_eq!(description, "nope");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_pending_calls() {
        let (c, _rx) = correlator(CallConfig::default());

        let task = tokio::spawn({
            let c = c.clone();
            async move { c.call("Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;

        c.close();

        assert!(matches!(task.await.unwrap(), Err(CommandError::ConnectionClosed)));
        assert_eq!(c.pending_count(), 0);
        assert!(matches!(
            c.call("Reset", json!({})).await,
            Err(CommandError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_pending_id_is_rejected() {
        let calls = CallConfig {
            max_in_flight: 2,
            ..CallConfig::default()
        };
        let (c, _rx) = correlator(calls);

        let _first = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("dup", "Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;

        assert!(matches!(
            c.call_with_id("dup", "Reset", json!({})).await,
            Err(CommandError::DuplicateMessageId(id)) if id == "dup"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reject_policy_returns_busy() {
        let calls = CallConfig {
            overflow_policy: OverflowPolicy::Reject,
            ..CallConfig::default()
        };
        let (c, _rx) = correlator(calls);

        let _first = tokio::spawn({
            let c = c.clone();
            async move { c.call("Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;

        assert!(matches!(c.call("Reset", json!({})).await, Err(CommandError::Busy)));
    }

    #[tokio::test(start_paused = true)]
    async fn queue_policy_waits_for_slot() {
        let (c, mut rx) = correlator(CallConfig::default());

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("q1", "Reset", json!({})).await }
        });
        wait_for_pending(&c, 1).await;

        let second = tokio::spawn({
            let c = c.clone();
            async move { c.call_with_id("q2", "Reset", json!({})).await }
        });
        tokio::task::yield_now().await;
        assert!(!c.is_pending("q2"));

        c.resolve(OcppFrame::CallResult {
            unique_id: "q1".into(),
            payload: json!({}),
        });
        assert!(first.await.unwrap().is_ok());

        wait_for_pending(&c, 1).await;
        assert!(c.is_pending("q2"));
        c.resolve(OcppFrame::CallResult {
            unique_id: "q2".into(),
            payload: json!({}),
        });
        assert!(second.await.unwrap().is_ok());

        assert_eq!(sent_frame(&mut rx).unique_id(), "q1");
        assert_eq!(sent_frame(&mut rx).unique_id(), "q2");
    }
}
