//! The Run Controller (spec §4.7, component C7) lives in `conduit-runtime`,
//! which depends on this crate to reach `SessionHub`/`LogicalSessionState`.
//! To avoid the reverse dependency, the hub only knows about a `TurnRunner`
//! capability it calls back into when draining a queued message — the
//! run controller registers itself as the implementation at startup.

use async_trait::async_trait;

use conduit_core::{AgentId, ConnId, SessionId};

use crate::types::MessageOrigin;

/// Enough information to replay a queued turn exactly as if it had just
/// arrived (spec §3 `QueuedMessage.execute`).
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub text: String,
    pub source: MessageOrigin,
    pub from_agent_id: Option<AgentId>,
    pub from_session_id: Option<SessionId>,
    /// The connection that originated this turn, if any (spec §4.7 step 2:
    /// the `user_message` echo excludes the originator). Queued/replayed
    /// turns carry `None` since the original socket may be long gone by the
    /// time the queue drains.
    pub origin_conn_id: Option<ConnId>,
}

/// Consumed by [`crate::hub::SessionHub`] to start (or resume) a turn. The
/// only implementor in this workspace is `conduit_runtime::RunController`.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, request: TurnRequest);
}
