//! `ToolHost`: the consumed capability for executing a tool call emitted
//! mid-stream (spec §1 "tool execution... consumed as a `ToolHost`
//! contract", §4.7 step 7). Grounded on `skynet-agent::tools::tool_loop`'s
//! `execute_tool(&[Box<dyn Tool>], name, input)` dispatch, generalized from
//! a fixed in-process `Tool` slice to an injected capability so a CLI-backed
//! or remote tool host can stand in for the native one.

use async_trait::async_trait;
use serde_json::Value;

use conduit_core::{CallId, Result, SessionId};

/// Outcome of one tool call (spec §4.7 step 7 — either branch feeds a
/// `tool_result` `ChatEvent`).
#[derive(Debug, Clone)]
pub enum ToolCallOutcome {
    Ok(Value),
    Err(String),
}

/// Consumed capability for tool execution. One call per `tool_call` event
/// the run controller receives from the [`crate::llm_stream::LlmStream`].
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn call_tool(
        &self,
        session_id: &SessionId,
        call_id: &CallId,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutcome>;

    /// Tool definitions to surface to the model for this session (spec
    /// §4.7 inputs: `tools`). Implementations may vary these per session
    /// (e.g. CLI-specific tools only available under certain working dirs).
    fn tool_definitions(&self, session_id: &SessionId) -> Vec<crate::llm_stream::ToolSpec>;
}
