//! Server → Client event names and push-payload shapes (spec §6).
//!
//! Session lifecycle payloads carry the session summary as a bare
//! `serde_json::Value` rather than a concrete type: the summary's owner is
//! `conduit-sessions`, and this crate sits below it in the dependency
//! graph so the wire shape does not have to chase the storage type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const USER_MESSAGE: &str = "user_message";
pub const TEXT_DELTA: &str = "text_delta";
pub const TEXT_DONE: &str = "text_done";
pub const THINKING_START: &str = "thinking_start";
pub const THINKING_DELTA: &str = "thinking_delta";
pub const THINKING_DONE: &str = "thinking_done";
pub const TOOL_CALL: &str = "tool_call";
pub const TOOL_RESULT: &str = "tool_result";
pub const OUTPUT_CANCELLED: &str = "output_cancelled";
pub const SESSION_CREATED: &str = "session_created";
pub const SESSION_UPDATED: &str = "session_updated";
pub const SESSION_DELETED: &str = "session_deleted";
pub const SESSION_CLEARED: &str = "session_cleared";
pub const SUBSCRIBED: &str = "subscribed";
pub const UNSUBSCRIBED: &str = "unsubscribed";
pub const MESSAGE_QUEUED: &str = "message_queued";
pub const MESSAGE_DEQUEUED: &str = "message_dequeued";
pub const PANEL_EVENT: &str = "panel_event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub session_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDeltaPayload {
    pub session_id: String,
    pub response_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDonePayload {
    pub session_id: String,
    pub response_id: String,
    pub text: String,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingDeltaPayload {
    pub session_id: String,
    pub response_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingDonePayload {
    pub session_id: String,
    pub response_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub session_id: String,
    pub response_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub session_id: String,
    pub call_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputCancelledPayload {
    pub session_id: String,
    pub response_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLifecyclePayload {
    pub session_id: String,
    pub summary: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDeletedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClearedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQueuedPayload {
    pub session_id: String,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDequeuedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelEventPayload {
    pub panel_id: String,
    pub panel_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub payload: Value,
}
