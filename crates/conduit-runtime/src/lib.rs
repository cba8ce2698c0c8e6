//! Run Controller (spec §4.7, component C7): executes LLM turns against a
//! session's cached state, streaming assistant output and tool activity
//! back through the Session Hub's connection registry while persisting a
//! canonical `ChatEvent` trail through the Event Store.

pub mod controller;
pub mod llm_stream;
pub mod tool_host;

pub use controller::RunController;
pub use llm_stream::{LlmStream, LlmStreamEvent, LlmTurnRequest, ToolSpec};
pub use tool_host::{ToolCallOutcome, ToolHost};
