use async_trait::async_trait;
use serde_json::Value;

use conduit_core::{Result, SessionId};
use conduit_events::ChatEvent;

/// Everything a provider needs to decide whether it owns a session's
/// history and where to go find it. `attributes` is the session's full
/// `SessionAttributes` tree (spec §3) — providers look under
/// `providers.<id>`.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub session_id: SessionId,
    pub attributes: Value,
}

/// A source of prior `ChatEvent`s for a session (spec §4.2, component C2).
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Whether this provider claims the session at all (e.g. the session
    /// carries `providers.claude-cli` attributes).
    fn supports(&self, request: &HistoryRequest) -> bool;

    /// Resolve prior events. `Ok(None)` means "I claim this kind of
    /// session but could not find backing data for this one" (e.g. ENOENT
    /// on the external file) — the registry falls through to the next
    /// provider rather than treating it as an error.
    async fn get_history(&self, request: &HistoryRequest) -> Result<Option<Vec<ChatEvent>>>;

    /// Whether the core should *also* mirror events for this session into
    /// the event store. `false` for provider-backed sessions whose source
    /// of truth is an external file (spec §4.2 persistence policy).
    fn should_persist(&self, _request: &HistoryRequest) -> bool {
        true
    }
}
