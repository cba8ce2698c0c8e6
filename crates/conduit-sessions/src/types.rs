use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Durable summary row for a session (spec §3/§4.5, component C5).
///
/// `attributes` is the nested `SessionAttributes` tree — reserved keys
/// (`core.workingDir`, `providers.<id>.*`) live under it and are mutated
/// exclusively through [`crate::SessionIndex::update_attributes`]'s
/// deep-merge, never by direct column writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub pinned_at: Option<String>,
    pub deleted: bool,
    pub last_snippet: Option<String>,
    pub attributes: Value,
}
