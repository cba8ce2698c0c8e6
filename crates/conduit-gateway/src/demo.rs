//! Stand-in implementations of the consumed capabilities spec §1 scopes
//! out of this repo ("LLM/agent backend", "tool execution engine").
//! Grounded on `skynet-agent`'s role as the pluggable model backend this
//! gateway would otherwise wire up — here reduced to an echo so the
//! binary is runnable and the Run Controller's state machine exercises a
//! real stream instead of a mock in tests only.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use conduit_core::{ConduitError, Result};
use conduit_runtime::{LlmStream, LlmStreamEvent, LlmTurnRequest, ToolCallOutcome, ToolHost, ToolSpec};

/// Streams the final user message back, word by word, as text deltas.
/// Demo-only — never call out to any model or process.
pub struct EchoLlmStream;

#[async_trait]
impl LlmStream for EchoLlmStream {
    async fn stream_turn(
        &self,
        request: LlmTurnRequest,
        tx: mpsc::Sender<LlmStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(last_user) = request.messages.iter().rev().find(|m| m.role == conduit_history::ChatRole::User) else {
            return Ok(());
        };

        for word in last_user.content.split_whitespace() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if tx.send(LlmStreamEvent::TextDelta(format!("{word} "))).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Reports every call as unknown. Demo-only — a real deployment wires a
/// `ToolHost` that actually executes tools.
pub struct NoToolsHost;

#[async_trait]
impl ToolHost for NoToolsHost {
    async fn call_tool(
        &self,
        _session_id: &conduit_core::SessionId,
        _call_id: &conduit_core::CallId,
        tool_name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolCallOutcome> {
        Err(ConduitError::ToolNotFound { name: tool_name.to_string() })
    }

    fn tool_definitions(&self, _session_id: &conduit_core::SessionId) -> Vec<ToolSpec> {
        Vec::new()
    }
}
