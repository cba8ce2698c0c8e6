//! CLI Tool-Call Rendezvous (spec §4.9, component C9): when an external CLI
//! agent (Claude Code, Pi, ...) reports `tool_execution_start`/`_end`
//! out-of-band from the run controller's own tool loop, the hub needs a
//! place to remember which `callId` those notifications belong to so a
//! `panel_event` referencing the same call can be correlated. Grounded on
//! `dashmap::DashMap` the way `conduit-events::EventStore` uses it for its
//! subscriber/write-lock maps.

use dashmap::DashMap;
use serde_json::Value;

use conduit_core::{CallId, SessionId};

/// What a CLI reported about one tool call.
#[derive(Debug, Clone)]
pub struct CliToolCallRecord {
    pub session_id: SessionId,
    pub call_id: CallId,
    pub tool_name: String,
    pub args: Value,
}

/// Lookup key for [`CliToolCallRendezvous::find`].
#[derive(Debug, Clone)]
pub struct CliToolCallQuery<'a> {
    pub session_id: &'a SessionId,
    pub call_id: &'a CallId,
}

/// Process-wide table of the most recent CLI-reported tool call per
/// `(sessionId, callId)`. Entries are overwritten on `record`, so a later
/// `tool_execution_start` for the same call replaces an earlier one rather
/// than accumulating history — this registry is a rendezvous point, not a
/// log.
#[derive(Default)]
pub struct CliToolCallRendezvous {
    records: DashMap<(SessionId, CallId), CliToolCallRecord>,
}

impl CliToolCallRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: SessionId, call_id: CallId, tool_name: String, args: Value) {
        self.records.insert(
            (session_id.clone(), call_id.clone()),
            CliToolCallRecord { session_id, call_id, tool_name, args },
        );
    }

    pub fn find(&self, query: CliToolCallQuery<'_>) -> Option<CliToolCallRecord> {
        self.records
            .get(&(query.session_id.clone(), query.call_id.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Drop every record for a session — called on session delete so a
    /// future session id can't accidentally rendezvous with stale data.
    pub fn clear_session(&self, session_id: &SessionId) {
        self.records.retain(|(sid, _), _| sid != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_then_find_roundtrips() {
        let rendezvous = CliToolCallRendezvous::new();
        let session_id = SessionId::new();
        let call_id = CallId::new();
        rendezvous.record(session_id.clone(), call_id.clone(), "bash".to_string(), json!({"cmd": "ls"}));

        let found = rendezvous.find(CliToolCallQuery { session_id: &session_id, call_id: &call_id }).unwrap();
        assert_eq!(found.tool_name, "bash");
        assert_eq!(found.args, json!({"cmd": "ls"}));
    }

    #[test]
    fn find_missing_returns_none() {
        let rendezvous = CliToolCallRendezvous::new();
        let session_id = SessionId::new();
        let call_id = CallId::new();
        assert!(rendezvous.find(CliToolCallQuery { session_id: &session_id, call_id: &call_id }).is_none());
    }

    #[test]
    fn later_record_overwrites_earlier() {
        let rendezvous = CliToolCallRendezvous::new();
        let session_id = SessionId::new();
        let call_id = CallId::new();
        rendezvous.record(session_id.clone(), call_id.clone(), "bash".to_string(), json!({}));
        rendezvous.record(session_id.clone(), call_id.clone(), "read".to_string(), json!({"path": "/a"}));

        let found = rendezvous.find(CliToolCallQuery { session_id: &session_id, call_id: &call_id }).unwrap();
        assert_eq!(found.tool_name, "read");
    }

    #[test]
    fn clear_session_removes_only_its_records() {
        let rendezvous = CliToolCallRendezvous::new();
        let session_a = SessionId::new();
        let session_b = SessionId::new();
        let call_id = CallId::new();
        rendezvous.record(session_a.clone(), call_id.clone(), "bash".to_string(), json!({}));
        rendezvous.record(session_b.clone(), call_id.clone(), "bash".to_string(), json!({}));

        rendezvous.clear_session(&session_a);

        assert!(rendezvous.find(CliToolCallQuery { session_id: &session_a, call_id: &call_id }).is_none());
        assert!(rendezvous.find(CliToolCallQuery { session_id: &session_b, call_id: &call_id }).is_some());
    }
}
