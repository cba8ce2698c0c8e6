use std::collections::{HashMap, VecDeque};

use tokio_util::sync::CancellationToken;

use conduit_core::{AgentId, CallId, ConnId, ResponseId, SessionId, TurnId};
use conduit_history::ChatCompletionMessage;
use conduit_sessions::SessionSummary;

/// Where a queued or in-flight message originated (spec §4.7 "queued
/// follow-ups"). Downstream chat-message projection reads this to decide
/// the `meta.source` tag; it does not otherwise change turn logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    User,
    Agent,
}

/// A message waiting for its turn because a run was already active when it
/// arrived (spec §4.6 queueing, §3 `QueuedMessage`). The source's `execute`
/// closure from the original design collapses here into the data a
/// [`crate::turn_runner::TurnRunner`] needs to replay the same call.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub session_id: SessionId,
    pub text: String,
    pub queued_at: String,
    pub source: MessageOrigin,
    pub from_agent_id: Option<AgentId>,
    pub from_session_id: Option<SessionId>,
    /// Carried through to the replayed [`crate::turn_runner::TurnRequest`].
    /// Always `None` in practice today — by the time a message is queued
    /// the connection that sent it may already be gone — but kept so a
    /// caller with a still-live connection can thread it through.
    pub origin_conn_id: Option<ConnId>,
}

impl QueuedMessage {
    pub fn new(
        session_id: SessionId,
        text: String,
        source: MessageOrigin,
        from_agent_id: Option<AgentId>,
        from_session_id: Option<SessionId>,
    ) -> Self {
        Self {
            id: conduit_core::types::new_durable_id(),
            session_id,
            text,
            queued_at: conduit_core::types::now_rfc3339(),
            source,
            from_agent_id,
            from_session_id,
            origin_conn_id: None,
        }
    }
}

/// A tool call the run controller is waiting on a result for (spec §4.7
/// step 6/7, §3 `ActiveChatRun.activeToolCalls`).
#[derive(Debug, Clone)]
pub struct ActiveToolCall {
    pub call_id: CallId,
    pub tool_name: String,
    pub args_json: serde_json::Value,
}

/// In-memory controller state for one in-flight turn (spec §3
/// `ActiveChatRun`, GLOSSARY "Active chat run"). Exclusively owned and
/// mutated by the run controller task that created it; other readers only
/// ever see broadcast snapshots, never this struct directly.
#[derive(Clone)]
pub struct ActiveChatRun {
    pub turn_id: Option<TurnId>,
    pub response_id: ResponseId,
    pub cancel_token: CancellationToken,
    pub accumulated_text: String,
    pub text_started_at: Option<String>,
    pub active_tool_calls: HashMap<CallId, ActiveToolCall>,
    /// Set when the user explicitly cancelled output (as opposed to an
    /// implicit abort like a session switch) — gates whether in-flight
    /// tool calls get `{error: {code: "interrupted"}}` results (spec §4.7
    /// cancellation semantics, §9 open question (a)).
    pub output_cancelled: bool,
    pub agent_exchange_id: Option<String>,
}

impl ActiveChatRun {
    pub fn new(response_id: ResponseId) -> Self {
        Self {
            turn_id: None,
            response_id,
            cancel_token: CancellationToken::new(),
            accumulated_text: String::new(),
            text_started_at: None,
            active_tool_calls: HashMap::new(),
            output_cancelled: false,
            agent_exchange_id: None,
        }
    }
}

/// Everything the hub caches about one session between turns (spec §3
/// `LogicalSessionState`, §4.6, component C6). Held behind an
/// `Arc<RwLock<_>>` so a run controller task can mutate it while the hub's
/// connection-management methods read it concurrently.
///
/// Invariant: at most one `active_chat_run` at a time; `queue` drains FIFO
/// only while `active_chat_run` is `None`.
pub struct LogicalSessionState {
    pub summary: SessionSummary,
    pub chat_messages: Vec<ChatCompletionMessage>,
    pub active_chat_run: Option<ActiveChatRun>,
    pub queue: VecDeque<QueuedMessage>,
    pub deleted: bool,
}

impl LogicalSessionState {
    pub fn new(summary: SessionSummary) -> Self {
        let deleted = summary.deleted;
        Self {
            summary,
            chat_messages: Vec::new(),
            active_chat_run: None,
            queue: VecDeque::new(),
            deleted,
        }
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::from(self.summary.session_id.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.active_chat_run.is_some()
    }
}
