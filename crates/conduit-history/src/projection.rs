//! Chat-Message Projection (spec §4.3, component C3): folds a `ChatEvent`
//! stream into a linear `ChatCompletionMessage` list for a specific
//! provider.

use conduit_events::{ChatEvent, ChatEventType};
use serde_json::Value;

use crate::types::{ChatCompletionMessage, ChatRole, MessageMeta, ToolCallSpec};

/// Fold events into a structured message list. `preserve_thinking` controls
/// rule 6: providers that can carry a signed thinking block set this true;
/// plain-transcript providers never see `thinking_done` at all.
pub fn project_to_chat_messages(events: &[ChatEvent], preserve_thinking: bool) -> Vec<ChatCompletionMessage> {
    let mut out: Vec<ChatCompletionMessage> = Vec::new();
    let mut open_tool_group: Option<usize> = None;

    for event in events {
        match event.event_type {
            ChatEventType::UserMessage => {
                open_tool_group = None;
                out.push(user_message_from(event));
            }
            ChatEventType::ToolCall => {
                let spec = tool_call_spec_from(event);
                match open_tool_group {
                    Some(idx) => out[idx].tool_calls.push(spec),
                    None => {
                        let mut msg = ChatCompletionMessage::assistant(String::new());
                        msg.tool_calls.push(spec);
                        out.push(msg);
                        open_tool_group = Some(out.len() - 1);
                    }
                }
            }
            ChatEventType::ToolResult => {
                open_tool_group = None;
                out.push(tool_result_message_from(event));
            }
            ChatEventType::AssistantDone => {
                let text = text_of(event);
                match open_tool_group {
                    Some(idx) if out[idx].content.is_empty() => out[idx].content = text,
                    _ => out.push(ChatCompletionMessage::assistant(text)),
                }
                open_tool_group = None;
            }
            ChatEventType::AgentCallback => {
                open_tool_group = None;
                out.push(ChatCompletionMessage::user(callback_text(event)));
            }
            ChatEventType::ThinkingDone => {
                if preserve_thinking {
                    open_tool_group = None;
                    let mut msg = ChatCompletionMessage::assistant(String::new());
                    msg.pi_sdk_message = Some(serde_json::json!({ "thinking": text_of(event) }));
                    out.push(msg);
                }
            }
            // turn_start/turn_end/summary_message/custom_message/interrupt carry no
            // chat-completion role of their own.
            ChatEventType::TurnStart
            | ChatEventType::TurnEnd
            | ChatEventType::SummaryMessage
            | ChatEventType::CustomMessage
            | ChatEventType::Interrupt => {}
        }
    }

    out
}

/// Claude/Codex CLI variant: a plain `"User: ...\nAssistant: ..."` transcript,
/// preserving the agent-callback prefix. Never includes thinking blocks or
/// tool-call structure — those providers only ever see rendered text.
pub fn project_to_plain_transcript(events: &[ChatEvent]) -> String {
    let mut lines = Vec::new();
    for event in events {
        match event.event_type {
            ChatEventType::UserMessage => lines.push(format!("User: {}", text_of(event))),
            ChatEventType::AssistantDone => lines.push(format!("Assistant: {}", text_of(event))),
            ChatEventType::AgentCallback => lines.push(format!("User: {}", callback_text(event))),
            _ => {}
        }
    }
    lines.join("\n")
}

fn text_of(event: &ChatEvent) -> String {
    event
        .payload
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn callback_text(event: &ChatEvent) -> String {
    let from_agent = event
        .payload
        .get("fromAgentId")
        .and_then(Value::as_str)
        .unwrap_or("agent");
    format!("[Callback from {from_agent}]: {}", text_of(event))
}

fn user_message_from(event: &ChatEvent) -> ChatCompletionMessage {
    let mut msg = ChatCompletionMessage::user(text_of(event));
    msg.meta = event
        .payload
        .get("meta")
        .and_then(|m| serde_json::from_value::<MessageMeta>(m.clone()).ok());
    msg
}

fn tool_call_spec_from(event: &ChatEvent) -> ToolCallSpec {
    ToolCallSpec {
        id: event
            .payload
            .get("callId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: event
            .payload
            .get("toolName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        arguments: event.payload.get("arguments").cloned().unwrap_or(Value::Null),
    }
}

fn tool_result_message_from(event: &ChatEvent) -> ChatCompletionMessage {
    let call_id = event
        .payload
        .get("callId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let ok = event.payload.get("ok").and_then(Value::as_bool).unwrap_or(true);
    let body = if ok {
        serde_json::json!({ "ok": true, "result": event.payload.get("result").cloned().unwrap_or(Value::Null) })
    } else {
        serde_json::json!({ "ok": false, "error": event.payload.get("error").cloned().unwrap_or(Value::Null) })
    };
    ChatCompletionMessage::tool(call_id, body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::SessionId;
    use serde_json::json;

    fn event(session_id: &SessionId, ty: ChatEventType, payload: Value) -> ChatEvent {
        ChatEvent::new(session_id.clone(), ty, payload)
    }

    #[test]
    fn simple_turn_projects_user_then_assistant() {
        let session_id = SessionId::new();
        let events = vec![
            event(&session_id, ChatEventType::TurnStart, json!({})),
            event(&session_id, ChatEventType::UserMessage, json!({"text": "hi"})),
            event(&session_id, ChatEventType::AssistantDone, json!({"text": "hello"})),
            event(&session_id, ChatEventType::TurnEnd, json!({})),
        ];
        let messages = project_to_chat_messages(&events, false);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "hello");
    }

    #[test]
    fn tool_calls_group_then_attach_assistant_text() {
        let session_id = SessionId::new();
        let events = vec![
            event(&session_id, ChatEventType::UserMessage, json!({"text": "list files"})),
            event(
                &session_id,
                ChatEventType::ToolCall,
                json!({"callId": "c1", "toolName": "list_files", "arguments": {}}),
            ),
            event(
                &session_id,
                ChatEventType::ToolCall,
                json!({"callId": "c2", "toolName": "read_file", "arguments": {"path": "a"}}),
            ),
            event(&session_id, ChatEventType::ToolResult, json!({"callId": "c1", "ok": true, "result": "a,b"})),
            event(&session_id, ChatEventType::ToolResult, json!({"callId": "c2", "ok": false, "error": "missing"})),
            event(&session_id, ChatEventType::AssistantDone, json!({"text": "done"})),
        ];
        let messages = project_to_chat_messages(&events, false);
        // user, synthetic-assistant(tool_calls x2, then text attached), tool x2
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].tool_calls.len(), 2);
        assert_eq!(messages[2].role, ChatRole::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c2"));
        assert!(messages[3].content.contains("\"ok\":false"));
        // the assistant text arrives after the tool results in this ordering,
        // so it becomes a new message rather than attaching to the closed group.
    }

    #[test]
    fn tool_call_then_immediate_text_attaches_to_same_message() {
        let session_id = SessionId::new();
        let events = vec![
            event(&session_id, ChatEventType::ToolCall, json!({"callId": "c1", "toolName": "t", "arguments": {}})),
            event(&session_id, ChatEventType::AssistantDone, json!({"text": "done"})),
        ];
        let messages = project_to_chat_messages(&events, false);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "done");
        assert_eq!(messages[0].tool_calls.len(), 1);
    }

    #[test]
    fn agent_callback_gets_prefixed_as_user_message() {
        let session_id = SessionId::new();
        let events = vec![event(
            &session_id,
            ChatEventType::AgentCallback,
            json!({"text": "ping", "fromAgentId": "research"}),
        )];
        let messages = project_to_chat_messages(&events, false);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "[Callback from research]: ping");
    }

    #[test]
    fn thinking_done_is_excluded_unless_preserved() {
        let session_id = SessionId::new();
        let events = vec![event(&session_id, ChatEventType::ThinkingDone, json!({"text": "reasoning"}))];
        assert!(project_to_chat_messages(&events, false).is_empty());
        assert_eq!(project_to_chat_messages(&events, true).len(), 1);
    }

    #[test]
    fn plain_transcript_preserves_callback_prefix() {
        let session_id = SessionId::new();
        let events = vec![
            event(&session_id, ChatEventType::UserMessage, json!({"text": "hi"})),
            event(&session_id, ChatEventType::AssistantDone, json!({"text": "hello"})),
            event(&session_id, ChatEventType::AgentCallback, json!({"text": "ping", "fromAgentId": "research"})),
        ];
        let transcript = project_to_plain_transcript(&events);
        assert_eq!(transcript, "User: hi\nAssistant: hello\nUser: [Callback from research]: ping");
    }
}
