//! Session registry: the single source of truth for which charge points
//! are connected and when they were last heard from.
//!
//! Every mutation of one charge point's session happens under the map
//! shard lock for that id, so `register`, `touch`, status updates and the
//! heartbeat scan never interleave for the same charge point.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::ChargePointStatus;

use super::connection::{CloseReason, Connection};

/// A charge point the gateway has seen since startup.
#[derive(Debug)]
pub struct ChargePointSession {
    pub charge_point_id: String,
    /// Live connection, `None` after the socket closed
    pub connection: Option<Connection>,
    pub status: ChargePointStatus,
    /// Status to restore when an OFFLINE charge point speaks again
    status_before_offline: Option<ChargePointStatus>,
    pub last_seen_at: DateTime<Utc>,
}

impl ChargePointSession {
    fn new(connection: Connection, now: DateTime<Utc>) -> Self {
        Self {
            charge_point_id: connection.charge_point_id.clone(),
            connection: Some(connection),
            status: ChargePointStatus::Online,
            status_before_offline: None,
            last_seen_at: now,
        }
    }

    fn go_offline(&mut self) -> Option<StatusChange> {
        if self.status == ChargePointStatus::Offline {
            return None;
        }
        let from = self.status;
        self.status_before_offline = Some(from);
        self.status = ChargePointStatus::Offline;
        Some(StatusChange::new(&self.charge_point_id, from, ChargePointStatus::Offline))
    }

    fn come_back(&mut self) -> Option<StatusChange> {
        if self.status != ChargePointStatus::Offline {
            return None;
        }
        let to = self
            .status_before_offline
            .take()
            .unwrap_or(ChargePointStatus::Online);
        self.status = to;
        Some(StatusChange::new(&self.charge_point_id, ChargePointStatus::Offline, to))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            charge_point_id: self.charge_point_id.clone(),
            connection_id: self.connection.as_ref().map(|c| c.connection_id),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

/// A status transition that observers and the store should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub charge_point_id: String,
    pub from: ChargePointStatus,
    pub to: ChargePointStatus,
}

impl StatusChange {
    fn new(charge_point_id: &str, from: ChargePointStatus, to: ChargePointStatus) -> Self {
        Self {
            charge_point_id: charge_point_id.to_string(),
            from,
            to,
        }
    }
}

/// Read-only copy of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub charge_point_id: String,
    pub connection_id: Option<u64>,
    pub status: ChargePointStatus,
    pub last_seen_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }
}

/// Result of registering a new connection
#[derive(Debug)]
pub struct RegisterResult {
    /// The previous live connection, already told to close
    pub evicted: Option<Connection>,
    pub status_change: Option<StatusChange>,
}

/// Thread-safe registry of charge point sessions
pub struct SessionRegistry {
    sessions: DashMap<String, ChargePointSession>,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Wrap in `Arc` for shared ownership
    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a live connection. Last writer wins: a previous live
    /// connection for the same id is closed.
    pub fn register(&self, connection: Connection) -> RegisterResult {
        let now = Utc::now();
        let charge_point_id = connection.charge_point_id.clone();
        let connection_id = connection.connection_id;

        let (evicted, status_change) = match self.sessions.entry(charge_point_id.clone()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                let evicted = session.connection.replace(connection);
                session.last_seen_at = now;
                (evicted, session.come_back())
            }
            Entry::Vacant(entry) => {
                entry.insert(ChargePointSession::new(connection, now));
                (None, None)
            }
        };

        if let Some(old) = &evicted {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                old_connection_id = old.connection_id,
                connection_id,
                "Replacing live connection, closing the old one"
            );
            old.close(CloseReason::Replaced);
        } else {
            info!(
                charge_point_id = charge_point_id.as_str(),
                connection_id, "Registered charge point session"
            );
        }

        RegisterResult {
            evicted,
            status_change,
        }
    }

    /// Clear the connection handle if it still belongs to `connection_id`.
    ///
    /// A stale close (the old socket of a replaced connection) is ignored.
    /// The session record is kept and marked OFFLINE.
    pub fn unregister(&self, charge_point_id: &str, connection_id: u64) -> UnregisterOutcome {
        let Some(mut session) = self.sessions.get_mut(charge_point_id) else {
            warn!(charge_point_id, "Attempted to unregister unknown session");
            return UnregisterOutcome::Unknown;
        };

        match &session.connection {
            Some(current) if current.connection_id == connection_id => {
                session.connection = None;
                let change = session.go_offline();
                info!(charge_point_id, connection_id, "Unregistered charge point session");
                UnregisterOutcome::Removed(change)
            }
            _ => {
                debug!(
                    charge_point_id,
                    connection_id, "Ignoring close of a connection that was already replaced"
                );
                UnregisterOutcome::Stale
            }
        }
    }

    /// Update last-seen to now; called on every inbound frame.
    pub fn touch(&self, charge_point_id: &str) -> Option<StatusChange> {
        self.touch_at(charge_point_id, Utc::now())
    }

    /// Update last-seen to `now`, restoring the status of an OFFLINE session.
    pub fn touch_at(&self, charge_point_id: &str, now: DateTime<Utc>) -> Option<StatusChange> {
        let mut session = self.sessions.get_mut(charge_point_id)?;
        session.last_seen_at = now;
        session.come_back()
    }

    /// Set the reported status (StatusNotification, BootNotification).
    pub fn set_status(
        &self,
        charge_point_id: &str,
        status: ChargePointStatus,
    ) -> Option<StatusChange> {
        let mut session = self.sessions.get_mut(charge_point_id)?;
        session.status_before_offline = None;
        let from = std::mem::replace(&mut session.status, status);
        (from != status).then(|| StatusChange::new(charge_point_id, from, status))
    }

    /// Flag every live session silent for longer than `timeout` as OFFLINE.
    pub fn expire_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if session.connection.is_none() {
                continue;
            }
            if now.signed_duration_since(session.last_seen_at) > timeout {
                if let Some(change) = session.go_offline() {
                    changes.push(change);
                }
            }
        }
        changes
    }

    /// Live connection for a charge point, `None` when unreachable.
    pub fn lookup(&self, charge_point_id: &str) -> Option<Connection> {
        self.sessions
            .get(charge_point_id)
            .and_then(|s| s.connection.clone())
    }

    pub fn snapshot(&self, charge_point_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(charge_point_id).map(|s| s.snapshot())
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|s| s.snapshot()).collect()
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions
            .get(charge_point_id)
            .is_some_and(|s| s.connection.is_some())
    }

    /// Get all connected charge point IDs
    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.connection.is_some())
            .map(|s| s.key().clone())
            .collect()
    }

    pub fn count_connected(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.connection.is_some())
            .count()
    }

    /// Close every live connection (server shutdown).
    pub fn close_all(&self, reason: CloseReason) {
        let connections: Vec<Connection> = self
            .sessions
            .iter()
            .filter_map(|s| s.connection.clone())
            .collect();
        for connection in connections {
            connection.close(reason);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// What `unregister` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// Handle cleared; carries the OFFLINE transition if there was one
    Removed(Option<StatusChange>),
    /// The handle belonged to a newer connection and was left alone
    Stale,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::Outbound;
    use crate::config::CallConfig;
    use tokio::sync::mpsc;

    fn connection(id: &str) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(id, tx, &CallConfig::default()), rx)
    }

    #[test]
    fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connection("CP1");
        let id = conn.connection_id;

        let result = registry.register(conn);
        assert!(result.evicted.is_none());
        assert_eq!(registry.lookup("CP1").unwrap().connection_id, id);
        assert!(registry.lookup("CP404").is_none());
        assert_eq!(registry.count_connected(), 1);
    }

    #[test]
    fn replacing_connection_closes_old_one() {
        let registry = SessionRegistry::new();
        let (old, mut old_rx) = connection("CP1");
        let (new, _new_rx) = connection("CP1");
        let old_id = old.connection_id;
        let new_id = new.connection_id;

        registry.register(old);
        let result = registry.register(new);

        assert_eq!(result.evicted.unwrap().connection_id, old_id);
        assert_eq!(old_rx.try_recv().unwrap(), Outbound::Close(CloseReason::Replaced));
        assert_eq!(registry.lookup("CP1").unwrap().connection_id, new_id);
        assert_eq!(registry.count_connected(), 1);
    }

    #[test]
    fn stale_unregister_keeps_new_connection() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = connection("CP1");
        let (new, _new_rx) = connection("CP1");
        let old_id = old.connection_id;
        let new_id = new.connection_id;

        registry.register(old);
        registry.register(new);

        assert_eq!(registry.unregister("CP1", old_id), UnregisterOutcome::Stale);
        assert_eq!(registry.lookup("CP1").unwrap().connection_id, new_id);

        let outcome = registry.unregister("CP1", new_id);
        assert!(matches!(outcome, UnregisterOutcome::Removed(Some(_))));
        assert!(registry.lookup("CP1").is_none());
        // record is retained
        let snapshot = registry.snapshot("CP1").unwrap();
        assert!(!snapshot.is_connected());
        assert_eq!(snapshot.status, ChargePointStatus::Offline);
    }

    #[test]
    fn expire_stale_respects_exact_timeout() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connection("CP1");
        registry.register(conn);

        let t0 = Utc::now();
        registry.touch_at("CP1", t0);
        let timeout = Duration::milliseconds(300_000);

        let at_limit = t0 + Duration::milliseconds(299_999);
        assert!(registry.expire_stale(at_limit, timeout).is_empty());
        assert_eq!(registry.snapshot("CP1").unwrap().status, ChargePointStatus::Online);

        let past_limit = t0 + Duration::milliseconds(300_001);
        let changes = registry.expire_stale(past_limit, timeout);
        assert_eq!(
            changes,
            vec![StatusChange::new(
                "CP1",
                ChargePointStatus::Online,
                ChargePointStatus::Offline
            )]
        );
        // still connected, only flagged offline
        assert!(registry.is_connected("CP1"));
        assert!(registry.expire_stale(past_limit, timeout).is_empty());
    }

    #[test]
    fn touch_restores_previous_status() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connection("CP1");
        registry.register(conn);
        registry.set_status("CP1", ChargePointStatus::Faulted);

        let t0 = Utc::now();
        registry.touch_at("CP1", t0);
        registry.expire_stale(t0 + Duration::seconds(10), Duration::seconds(5));
        assert_eq!(registry.snapshot("CP1").unwrap().status, ChargePointStatus::Offline);

        let change = registry.touch_at("CP1", t0 + Duration::seconds(11)).unwrap();
        assert_eq!(change.to, ChargePointStatus::Faulted);
        assert_eq!(registry.snapshot("CP1").unwrap().status, ChargePointStatus::Faulted);
        assert!(registry.touch_at("CP1", t0 + Duration::seconds(12)).is_none());
    }

    #[test]
    fn reconnect_restores_status() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = connection("CP1");
        let first_id = first.connection_id;
        registry.register(first);
        registry.set_status("CP1", ChargePointStatus::Available);
        registry.unregister("CP1", first_id);

        let (second, _rx2) = connection("CP1");
        let result = registry.register(second);
        assert_eq!(result.status_change.unwrap().to, ChargePointStatus::Available);
    }

    #[test]
    fn disconnected_sessions_are_not_scanned() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connection("CP1");
        let id = conn.connection_id;
        registry.register(conn);
        registry.unregister("CP1", id);

        let later = Utc::now() + Duration::hours(1);
        assert!(registry.expire_stale(later, Duration::seconds(1)).is_empty());
    }

    #[test]
    fn set_status_reports_only_changes() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connection("CP1");
        registry.register(conn);

        assert!(registry.set_status("CP1", ChargePointStatus::Online).is_none());
        let change = registry.set_status("CP1", ChargePointStatus::Available).unwrap();
        assert_eq!(change.from, ChargePointStatus::Online);
        assert!(registry.set_status("CP404", ChargePointStatus::Online).is_none());
    }
}
