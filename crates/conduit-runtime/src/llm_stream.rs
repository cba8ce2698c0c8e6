//! `LlmStream`: the consumed capability the Run Controller drives an LLM
//! turn through (spec §1 "LLM transport consumed as an `LlmStream`
//! iterator contract"). Grounded on `skynet-agent::provider::LlmProvider`'s
//! `send_stream(&req, tx)` shape — a channel rather than a boxed `Stream`,
//! so a provider implementation can `tokio::spawn` its own SSE pump
//! exactly the way `skynet-agent::anthropic_stream` does.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use conduit_core::{AgentId, CallId, Result, SessionId};
use conduit_history::ChatCompletionMessage;

/// A tool definition surfaced to the model (spec §4.7 inputs: `tools`).
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Everything an `LlmStream` implementation needs to drive one streamed
/// assistant response (spec §4.7 inputs, minus the parts — `state`,
/// `cancelScope`, `shouldEmitEvents` — that are the controller's own
/// concern rather than the provider's).
#[derive(Debug, Clone)]
pub struct LlmTurnRequest {
    pub session_id: SessionId,
    pub provider: String,
    pub agent: AgentId,
    pub messages: Vec<ChatCompletionMessage>,
    pub tools: Vec<ToolSpec>,
}

/// One event out of a streamed turn (spec §4.7 step 6).
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    TextDelta(String),
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd,
    ToolCall { call_id: CallId, tool_name: String, arguments: Value },
    /// `aborted` distinguishes a cooperative cancellation (cancel token
    /// fired) from a genuine upstream failure — the controller only
    /// surfaces the latter as `upstream_error`.
    Error { aborted: bool, message: String },
}

/// Consumed capability for turn execution (spec §1 out-of-scope: "LLM
/// transport"). One implementation per native SDK or external CLI driver;
/// the controller is agnostic to which.
#[async_trait]
pub trait LlmStream: Send + Sync {
    /// Drive one assistant response, pushing events to `tx` as they
    /// arrive. Must return promptly once `cancel` fires — the controller
    /// relies on cooperative cancellation, it never forcibly aborts the
    /// task (spec §5 "Aborting the run's cancel token causes the provider
    /// iterator... to unwind cooperatively").
    async fn stream_turn(
        &self,
        request: LlmTurnRequest,
        tx: mpsc::Sender<LlmStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}
