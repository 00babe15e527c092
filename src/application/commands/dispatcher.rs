//! Command dispatcher, the single entry point for gateway-initiated calls.

use std::time::Instant;

use serde_json::Value;
use tracing::info;

use crate::application::session::SharedSessionRegistry;

use super::{
    change_configuration, remote_start_transaction, remote_stop_transaction, reset, send_command,
    CommandError, OutboundAction, ResetKind,
};

/// Record command dispatch latency to Prometheus.
fn record_command_latency(action: OutboundAction, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("ocpp_command_latency_seconds", "action" => action.as_str())
        .record(duration);
}

pub struct CommandDispatcher {
    session_registry: SharedSessionRegistry,
}

impl CommandDispatcher {
    pub fn new(session_registry: SharedSessionRegistry) -> Self {
        Self { session_registry }
    }

    /// Send a raw payload for `action` and return the raw response payload.
    pub async fn send(
        &self,
        charge_point_id: &str,
        action: OutboundAction,
        payload: Value,
    ) -> Result<Value, CommandError> {
        info!(charge_point_id, action = action.as_str(), "Dispatching command");
        let start = Instant::now();
        let result = send_command(&self.session_registry, charge_point_id, action, &payload).await;
        record_command_latency(action, start);
        result
    }

    pub async fn remote_start(
        &self,
        charge_point_id: &str,
        id_tag: &str,
        connector_id: Option<u32>,
    ) -> Result<String, CommandError> {
        let start = Instant::now();
        let result =
            remote_start_transaction(&self.session_registry, charge_point_id, id_tag, connector_id)
                .await;
        record_command_latency(OutboundAction::RemoteStartTransaction, start);
        result
    }

    pub async fn remote_stop(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<String, CommandError> {
        let start = Instant::now();
        let result =
            remote_stop_transaction(&self.session_registry, charge_point_id, transaction_id).await;
        record_command_latency(OutboundAction::RemoteStopTransaction, start);
        result
    }

    pub async fn reset(&self, charge_point_id: &str, kind: ResetKind) -> Result<String, CommandError> {
        let start = Instant::now();
        let result = reset(&self.session_registry, charge_point_id, kind).await;
        record_command_latency(OutboundAction::Reset, start);
        result
    }

    pub async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: &str,
        value: &str,
    ) -> Result<String, CommandError> {
        let start = Instant::now();
        let result = change_configuration(
            &self.session_registry,
            charge_point_id,
            key.to_string(),
            value.to_string(),
        )
        .await;
        record_command_latency(OutboundAction::ChangeConfiguration, start);
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::commands::test_support::{answer_next, connected};
    use crate::application::session::SessionRegistry;

    #[tokio::test]
    async fn unreachable_target() {
        let dispatcher = CommandDispatcher::new(SessionRegistry::shared());
        assert_eq!(
            dispatcher.remote_stop("CP9", 1).await,
            Err(CommandError::UnreachableTarget("CP9".into()))
        );
    }

    #[tokio::test]
    async fn remote_stop_through_dispatcher() {
        let (registry, connection, mut rx) = connected("CP2");
        let dispatcher = std::sync::Arc::new(CommandDispatcher::new(registry));

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.remote_stop("CP2", 42).await }
        });
        answer_next(&connection, &mut rx, json!({"status": "Accepted"})).await;

        assert_eq!(task.await.unwrap().unwrap(), "Accepted");
    }

    #[tokio::test]
    async fn generic_send_returns_raw_payload() {
        let (registry, connection, mut rx) = connected("CP2");
        let dispatcher = std::sync::Arc::new(CommandDispatcher::new(registry));

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .send("CP2", OutboundAction::Reset, json!({"type": "Soft"}))
                    .await
            }
        });
        answer_next(&connection, &mut rx, json!({"status": "Rejected"})).await;

        assert_eq!(task.await.unwrap().unwrap(), json!({"status": "Rejected"}));
    }
}
