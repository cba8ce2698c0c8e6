use conduit_core::{ResponseId, SessionId, TurnId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One immutable entry in a session's event log (spec §3/§4.1).
///
/// `event_type` determines the expected shape of `payload`; payload stays
/// a bare `Value` rather than a per-variant struct since C1 never inspects
/// it — only C2/C3 (history providers and the chat-message projection) do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: String,
    pub timestamp: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,
    #[serde(rename = "type")]
    pub event_type: ChatEventType,
    pub payload: Value,
}

impl ChatEvent {
    pub fn new(session_id: SessionId, event_type: ChatEventType, payload: Value) -> Self {
        Self {
            id: conduit_core::types::new_durable_id(),
            timestamp: conduit_core::types::now_rfc3339(),
            session_id,
            turn_id: None,
            response_id: None,
            event_type,
            payload,
        }
    }

    pub fn with_turn(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn with_response(mut self, response_id: ResponseId) -> Self {
        self.response_id = Some(response_id);
        self
    }
}

/// Variant discriminator for `ChatEvent::event_type` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventType {
    TurnStart,
    TurnEnd,
    UserMessage,
    AssistantDone,
    ThinkingDone,
    ToolCall,
    ToolResult,
    AgentCallback,
    SummaryMessage,
    CustomMessage,
    Interrupt,
}

impl ChatEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::UserMessage => "user_message",
            Self::AssistantDone => "assistant_done",
            Self::ThinkingDone => "thinking_done",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::AgentCallback => "agent_callback",
            Self::SummaryMessage => "summary_message",
            Self::CustomMessage => "custom_message",
            Self::Interrupt => "interrupt",
        }
    }
}

impl std::str::FromStr for ChatEventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "turn_start" => Self::TurnStart,
            "turn_end" => Self::TurnEnd,
            "user_message" => Self::UserMessage,
            "assistant_done" => Self::AssistantDone,
            "thinking_done" => Self::ThinkingDone,
            "tool_call" => Self::ToolCall,
            "tool_result" => Self::ToolResult,
            "agent_callback" => Self::AgentCallback,
            "summary_message" => Self::SummaryMessage,
            "custom_message" => Self::CustomMessage,
            "interrupt" => Self::Interrupt,
            other => return Err(format!("unknown chat event type: {other}")),
        })
    }
}
