//! Working-directory provisioning (spec §3/§4.6): "if missing and a
//! resolver is supplied, the hub creates it and writes `core.workingDir`
//! via the index." The policy for *what* path a session's working
//! directory should be (per-agent checkout root, a temp sandbox, ...) is
//! an external collaborator's concern — the hub only consumes it.

use std::path::PathBuf;

use conduit_core::SessionId;
use conduit_sessions::SessionSummary;

pub trait WorkingDirResolver: Send + Sync {
    /// Propose a working directory for a session that does not have one
    /// set yet. Returning `None` means "leave `core.workingDir` unset".
    fn resolve(&self, session_id: &SessionId, summary: &SessionSummary) -> Option<PathBuf>;
}

/// Resolver that always proposes `<root>/<sessionId>` — a reasonable
/// default sandbox layout and the one exercised by the hub's own tests.
pub struct RootedWorkingDirResolver {
    root: PathBuf,
}

impl RootedWorkingDirResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl WorkingDirResolver for RootedWorkingDirResolver {
    fn resolve(&self, session_id: &SessionId, _summary: &SessionSummary) -> Option<PathBuf> {
        Some(self.root.join(session_id.as_str()))
    }
}
