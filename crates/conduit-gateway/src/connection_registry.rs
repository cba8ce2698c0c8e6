//! The Connection Registry (spec §4.4, component C4). Grounded on
//! `skynet-gateway::app::AppState::ws_clients` (a `DashMap<String,
//! mpsc::Sender<String>>`), generalized into the two coupled maps §4.4
//! calls for: `{connectionId → SessionConnection}` and the inverted
//! `{sessionId → set<connection>}`, plus the interaction-capability map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use conduit_core::{ConnId, SessionId};
use conduit_hub::{ConnectionHub, InteractionSummary};
use conduit_protocol::EventFrame;

/// One physical duplex channel's registry-side bookkeeping (spec §3
/// `SessionConnection`). The socket itself is owned by the per-connection
/// task in `crate::ws::connection`; this struct is only the fan-out
/// target and the capability flags.
pub struct Connection {
    pub id: ConnId,
    sender: mpsc::UnboundedSender<EventFrame>,
    interaction_supported: AtomicBool,
    interaction_enabled: AtomicBool,
}

impl Connection {
    /// Best-effort send — a full or closed channel just means the socket
    /// is on its way out; broadcasts never block or fail the caller for a
    /// slow/dead reader (spec §5 "drop-on-overflow" policy, generalized to
    /// an unbounded per-connection queue since WS fan-out volume here is
    /// small compared to the event store's).
    fn send(&self, event: EventFrame) {
        let _ = self.sender.send(event);
    }
}

/// Tracks connections, per-session subscriptions, and interaction
/// capability (spec §4.4). Implements [`ConnectionHub`] so `conduit-hub`
/// can broadcast without depending on Axum or any transport crate.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnId, Arc<Connection>>,
    session_subscribers: DashMap<SessionId, DashSet<ConnId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-upgraded socket and returns the receiver its
    /// task should drain into the wire.
    pub fn register_connection(&self) -> (Arc<Connection>, mpsc::UnboundedReceiver<EventFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            id: ConnId::new(),
            sender: tx,
            interaction_supported: AtomicBool::new(false),
            interaction_enabled: AtomicBool::new(false),
        });
        self.connections.insert(conn.id.clone(), conn.clone());
        (conn, rx)
    }

    /// Drops a connection from every session's subscriber set and from the
    /// top-level registry. Called once the socket's task exits.
    pub fn unregister_connection(&self, conn_id: &ConnId) {
        self.unsubscribe_all(conn_id);
        self.connections.remove(conn_id);
    }

    /// Sends directly to one connection, bypassing subscription. Returns
    /// `false` if the connection is unknown (spec §4.4 `sendToConnection`).
    pub fn send_to_connection(&self, conn_id: &ConnId, event: EventFrame) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => {
                conn.send(event);
                true
            }
            None => false,
        }
    }

    /// Spec §4.8: `text_input` is only accepted for a session the
    /// connection has actually subscribed to.
    pub fn is_subscribed(&self, conn_id: &ConnId, session_id: &SessionId) -> bool {
        self.session_subscribers.get(session_id).map(|subs| subs.contains(conn_id)).unwrap_or(false)
    }

    /// Every session this connection currently subscribes to. Used to
    /// scope an `interaction_response` (which carries no `sessionId`) to
    /// the handful of sessions it could plausibly belong to.
    pub fn subscribed_sessions(&self, conn_id: &ConnId) -> Vec<SessionId> {
        self.session_subscribers
            .iter()
            .filter(|entry| entry.value().contains(conn_id))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl ConnectionHub for ConnectionRegistry {
    fn subscribe(&self, conn_id: &ConnId, session_id: &SessionId) {
        self.session_subscribers.entry(session_id.clone()).or_default().insert(conn_id.clone());
    }

    fn unsubscribe(&self, conn_id: &ConnId, session_id: &SessionId) {
        if let Some(subs) = self.session_subscribers.get(session_id) {
            subs.remove(conn_id);
        }
    }

    fn unsubscribe_all(&self, conn_id: &ConnId) {
        for entry in self.session_subscribers.iter() {
            entry.value().remove(conn_id);
        }
    }

    fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.session_subscribers.get(session_id).map(|subs| subs.len()).unwrap_or(0)
    }

    fn interaction_summary(&self, session_id: &SessionId) -> InteractionSummary {
        let Some(subs) = self.session_subscribers.get(session_id) else {
            return InteractionSummary::default();
        };
        // Snapshot the subscriber set before counting: concurrent
        // subscribe/unsubscribe must not panic or double count (spec §4.4
        // "all iteration... is done over a snapshot").
        let snapshot: Vec<ConnId> = subs.iter().map(|c| c.clone()).collect();
        let mut summary = InteractionSummary::default();
        for conn_id in snapshot {
            let Some(conn) = self.connections.get(&conn_id) else { continue };
            if conn.interaction_supported.load(Ordering::Relaxed) {
                summary.supported_count += 1;
            }
            if conn.interaction_enabled.load(Ordering::Relaxed) {
                summary.enabled_count += 1;
            }
        }
        summary
    }

    fn set_interaction_capability(&self, conn_id: &ConnId, supported: bool, enabled: bool) {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.interaction_supported.store(supported, Ordering::Relaxed);
            conn.interaction_enabled.store(enabled, Ordering::Relaxed);
        }
    }

    fn broadcast_to_session(&self, session_id: &SessionId, event: EventFrame) {
        let Some(subs) = self.session_subscribers.get(session_id) else { return };
        let snapshot: Vec<ConnId> = subs.iter().map(|c| c.clone()).collect();
        drop(subs);
        for conn_id in snapshot {
            if let Some(conn) = self.connections.get(&conn_id) {
                conn.send(event.clone());
            }
        }
    }

    fn broadcast_to_session_excluding(&self, session_id: &SessionId, event: EventFrame, exclude: &ConnId) {
        let Some(subs) = self.session_subscribers.get(session_id) else { return };
        let snapshot: Vec<ConnId> = subs.iter().map(|c| c.clone()).collect();
        drop(subs);
        for conn_id in snapshot {
            if &conn_id == exclude {
                continue;
            }
            if let Some(conn) = self.connections.get(&conn_id) {
                conn.send(event.clone());
            }
        }
    }

    fn broadcast_to_all(&self, event: EventFrame) {
        let snapshot: Vec<Arc<Connection>> = self.connections.iter().map(|e| e.value().clone()).collect();
        for conn in snapshot {
            conn.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_broadcast_reaches_only_subscribers() {
        let registry = ConnectionRegistry::new();
        let (conn_a, mut rx_a) = registry.register_connection();
        let (conn_b, mut rx_b) = registry.register_connection();
        let session_id = SessionId::new();

        registry.subscribe(&conn_a.id, &session_id);
        registry.broadcast_to_session(&session_id, EventFrame::new("text_delta", serde_json::json!({})));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_excluding_skips_originator() {
        let registry = ConnectionRegistry::new();
        let (conn_a, mut rx_a) = registry.register_connection();
        let (conn_b, mut rx_b) = registry.register_connection();
        let session_id = SessionId::new();

        registry.subscribe(&conn_a.id, &session_id);
        registry.subscribe(&conn_b.id, &session_id);
        registry.broadcast_to_session_excluding(
            &session_id,
            EventFrame::new("user_message", serde_json::json!({})),
            &conn_a.id,
        );

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_all_removes_from_every_session() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.register_connection();
        let session_a = SessionId::new();
        let session_b = SessionId::new();
        registry.subscribe(&conn.id, &session_a);
        registry.subscribe(&conn.id, &session_b);

        registry.unsubscribe_all(&conn.id);

        assert_eq!(registry.subscriber_count(&session_a), 0);
        assert_eq!(registry.subscriber_count(&session_b), 0);
    }

    #[test]
    fn interaction_summary_counts_supported_and_enabled() {
        let registry = ConnectionRegistry::new();
        let (conn_a, _rx_a) = registry.register_connection();
        let (conn_b, _rx_b) = registry.register_connection();
        let session_id = SessionId::new();
        registry.subscribe(&conn_a.id, &session_id);
        registry.subscribe(&conn_b.id, &session_id);

        registry.set_interaction_capability(&conn_a.id, true, true);
        registry.set_interaction_capability(&conn_b.id, true, false);

        let summary = registry.interaction_summary(&session_id);
        assert_eq!(summary.supported_count, 2);
        assert_eq!(summary.enabled_count, 1);
    }

    #[test]
    fn send_to_connection_reports_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_connection(&ConnId::new(), EventFrame::new("ping", serde_json::json!({}))));
    }

    #[test]
    fn unregister_connection_drops_it_from_registry_and_subscriptions() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.register_connection();
        let session_id = SessionId::new();
        registry.subscribe(&conn.id, &session_id);

        registry.unregister_connection(&conn.id);

        assert_eq!(registry.subscriber_count(&session_id), 0);
        assert!(!registry.send_to_connection(&conn.id, EventFrame::new("ping", serde_json::json!({}))));
    }

    #[test]
    fn subscribed_sessions_lists_only_this_connections_subscriptions() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.register_connection();
        let session_a = SessionId::new();
        let session_b = SessionId::new();
        registry.subscribe(&conn.id, &session_a);

        assert!(registry.is_subscribed(&conn.id, &session_a));
        assert!(!registry.is_subscribed(&conn.id, &session_b));
        assert_eq!(registry.subscribed_sessions(&conn.id), vec![session_a]);
    }
}
