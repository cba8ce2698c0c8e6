//! The Connection Registry (spec §4.4, component C4) lives in the gateway
//! binary crate — it owns the physical sockets. The hub only needs a
//! narrow consumed capability out of it: broadcasting, and the counts it
//! needs for LRU eviction and interaction availability. This mirrors the
//! `ToolHost`/`LlmStream` consumed-capability pattern used by the run
//! controller (spec §1 "out of scope... consumed via").

use conduit_core::{ConnId, SessionId};
use conduit_protocol::EventFrame;

/// Supported/enabled interaction counts for a session (spec §4.4
/// `getInteractionSummary`), consumed by C9 to decide whether a tool call
/// can pause for user interaction at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionSummary {
    pub supported_count: usize,
    pub enabled_count: usize,
}

/// What the Session Hub needs from the Connection Registry: broadcast
/// fan-out plus the bookkeeping queries that drive eviction and
/// interaction gating. Implemented by `conduit-gateway::ConnectionRegistry`
/// and injected into `SessionHub` at construction.
pub trait ConnectionHub: Send + Sync {
    fn subscribe(&self, conn_id: &ConnId, session_id: &SessionId);
    fn unsubscribe(&self, conn_id: &ConnId, session_id: &SessionId);
    fn unsubscribe_all(&self, conn_id: &ConnId);

    /// Number of connections currently subscribed to `session_id`. Used by
    /// the hub's LRU eviction rule ("skip sessions with... connections",
    /// spec §4.6).
    fn subscriber_count(&self, session_id: &SessionId) -> usize;

    fn interaction_summary(&self, session_id: &SessionId) -> InteractionSummary;

    /// Updates whether `conn_id` supports/has enabled interaction prompts at
    /// all (spec §4.4's `{connection → {supported, enabled}}` map, §4.6
    /// `setInteractionState`).
    fn set_interaction_capability(&self, conn_id: &ConnId, supported: bool, enabled: bool);

    fn broadcast_to_session(&self, session_id: &SessionId, event: EventFrame);

    /// Same as `broadcast_to_session` but skips one connection — used to
    /// echo a user's own `text_input` to every *other* subscriber of the
    /// session (spec §4.7 step 2).
    fn broadcast_to_session_excluding(&self, session_id: &SessionId, event: EventFrame, exclude: &ConnId);

    /// Session lifecycle changes go to every connection, not just
    /// subscribers of that session, so sidebars across sessions stay live
    /// (spec §4.6: "broadcasts... to all connections").
    fn broadcast_to_all(&self, event: EventFrame);
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// In-memory `ConnectionHub` used by hub/controller unit tests — records
    /// broadcasts instead of fanning out over real sockets.
    #[derive(Default)]
    pub struct RecordingConnectionHub {
        pub sent: Mutex<Vec<(String, EventFrame)>>,
        pub subscribers: Mutex<std::collections::HashMap<String, usize>>,
        pub capabilities: Mutex<std::collections::HashMap<String, (bool, bool)>>,
    }

    impl RecordingConnectionHub {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events_for(&self, session_id: &SessionId) -> Vec<EventFrame> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(sid, _)| sid == session_id.as_str())
                .map(|(_, e)| e.clone())
                .collect()
        }

        pub fn all_events(&self) -> Vec<EventFrame> {
            self.sent.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
        }
    }

    impl ConnectionHub for RecordingConnectionHub {
        fn subscribe(&self, _conn_id: &ConnId, session_id: &SessionId) {
            *self.subscribers.lock().unwrap().entry(session_id.as_str().to_string()).or_insert(0) += 1;
        }

        fn unsubscribe(&self, _conn_id: &ConnId, session_id: &SessionId) {
            if let Some(count) = self.subscribers.lock().unwrap().get_mut(session_id.as_str()) {
                *count = count.saturating_sub(1);
            }
        }

        fn unsubscribe_all(&self, _conn_id: &ConnId) {}

        fn subscriber_count(&self, session_id: &SessionId) -> usize {
            self.subscribers.lock().unwrap().get(session_id.as_str()).copied().unwrap_or(0)
        }

        fn interaction_summary(&self, _session_id: &SessionId) -> InteractionSummary {
            InteractionSummary::default()
        }

        fn set_interaction_capability(&self, conn_id: &ConnId, supported: bool, enabled: bool) {
            self.capabilities.lock().unwrap().insert(conn_id.as_str().to_string(), (supported, enabled));
        }

        fn broadcast_to_session(&self, session_id: &SessionId, event: EventFrame) {
            self.sent.lock().unwrap().push((session_id.as_str().to_string(), event));
        }

        fn broadcast_to_session_excluding(&self, session_id: &SessionId, event: EventFrame, _exclude: &ConnId) {
            self.sent.lock().unwrap().push((session_id.as_str().to_string(), event));
        }

        fn broadcast_to_all(&self, event: EventFrame) {
            self.sent.lock().unwrap().push(("*".to_string(), event));
        }
    }
}
