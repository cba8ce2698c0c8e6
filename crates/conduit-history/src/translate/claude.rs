use serde::Deserialize;
use serde_json::Value;

use conduit_core::SessionId;
use conduit_events::{ChatEvent, ChatEventType};

use super::common::TurnTracker;

/// One line of a Claude CLI session transcript (`~/.claude/projects/.../*.jsonl`).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClaudeEntry {
    User { message: ClaudeMessage },
    Assistant { message: ClaudeMessage },
    Summary { summary: String },
    FileHistorySnapshot,
    System,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Translates a Claude CLI JSONL transcript into `ChatEvent`s (spec §4.2).
///
/// `turn_start` fires at the first entry and on every user/assistant role
/// transition; text and thinking blocks become `user_message`/
/// `assistant_done`/`thinking_done`; tool_use blocks inside assistant
/// entries become `tool_call`; tool_result blocks inside user entries
/// (Claude echoes tool output back as a user-role message) become
/// `tool_result`, keyed by `tool_use_id`. File snapshots and system lines
/// carry no chat content and are ignored.
pub fn translate(session_id: &SessionId, contents: &str) -> Vec<ChatEvent> {
    let mut tracker = TurnTracker::new(session_id);
    let mut last_role: Option<&'static str> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: ClaudeEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) => continue,
        };

        match entry {
            ClaudeEntry::User { message } => {
                if last_role != Some("user") {
                    tracker.open_turn();
                    last_role = Some("user");
                }
                for block in message.content {
                    match block {
                        ClaudeContentBlock::Text { text } => {
                            tracker.push(ChatEventType::UserMessage, serde_json::json!({ "text": text }));
                        }
                        ClaudeContentBlock::ToolResult { tool_use_id, content, is_error } => {
                            tracker.push_tool_result(&tool_use_id, !is_error, content);
                        }
                        _ => {}
                    }
                }
            }
            ClaudeEntry::Assistant { message } => {
                if last_role != Some("assistant") {
                    tracker.open_turn();
                    last_role = Some("assistant");
                }
                let mut text_buf = String::new();
                let mut thinking_buf = String::new();
                for block in message.content {
                    match block {
                        ClaudeContentBlock::Text { text } => {
                            if !text_buf.is_empty() {
                                text_buf.push('\n');
                            }
                            text_buf.push_str(&text);
                        }
                        ClaudeContentBlock::Thinking { thinking } => {
                            if !thinking_buf.is_empty() {
                                thinking_buf.push('\n');
                            }
                            thinking_buf.push_str(&thinking);
                        }
                        ClaudeContentBlock::ToolUse { id, name, input } => {
                            if !text_buf.is_empty() {
                                tracker.push(
                                    ChatEventType::AssistantDone,
                                    serde_json::json!({ "text": std::mem::take(&mut text_buf) }),
                                );
                            }
                            tracker.push_tool_call(&id, &name, input);
                        }
                        _ => {}
                    }
                }
                if !thinking_buf.is_empty() {
                    tracker.push(ChatEventType::ThinkingDone, serde_json::json!({ "text": thinking_buf }));
                }
                if !text_buf.is_empty() {
                    tracker.push(ChatEventType::AssistantDone, serde_json::json!({ "text": text_buf }));
                }
            }
            ClaudeEntry::Summary { summary } => {
                last_role = None;
                tracker.standalone_turn(
                    ChatEventType::SummaryMessage,
                    serde_json::json!({ "text": summary, "summaryType": "summary" }),
                );
            }
            ClaudeEntry::FileHistorySnapshot | ClaudeEntry::System | ClaudeEntry::Unknown => {}
        }
    }

    tracker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::new()
    }

    #[test]
    fn translates_user_and_assistant_text() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"user","message":{"content":[{"type":"text","text":"hi"}]}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#,
        );
        let events = translate(&session_id, contents);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ChatEventType::TurnStart,
                ChatEventType::UserMessage,
                ChatEventType::TurnStart,
                ChatEventType::AssistantDone,
                ChatEventType::TurnEnd,
            ]
        );
    }

    #[test]
    fn tool_use_then_text_emits_call_before_done() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"user","message":{"content":[{"type":"text","text":"go"}]}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":["#,
            r#"{"type":"tool_use","id":"call_1","name":"search","input":{"q":"rust"}},"#,
            r#"{"type":"text","text":"done"}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"call_1","content":{"hits":3}}]}}"#,
        );
        let events = translate(&session_id, contents);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ChatEventType::TurnStart,
                ChatEventType::UserMessage,
                ChatEventType::ToolCall,
                ChatEventType::AssistantDone,
                ChatEventType::ToolResult,
                ChatEventType::TurnEnd,
            ]
        );
        let tool_result = events.iter().find(|e| e.event_type == ChatEventType::ToolResult).unwrap();
        assert_eq!(tool_result.payload["callId"], "call_1");
        assert_eq!(tool_result.payload["ok"], true);
    }

    #[test]
    fn summary_gets_its_own_turn() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"user","message":{"content":[{"type":"text","text":"hi"}]}}"#,
            "\n",
            r#"{"type":"summary","summary":"condensed context"}"#,
        );
        let events = translate(&session_id, contents);
        let summary = events.iter().find(|e| e.event_type == ChatEventType::SummaryMessage).unwrap();
        assert_eq!(summary.payload["summaryType"], "summary");
        // the user turn closed before the summary turn opened
        let turn_ends = events.iter().filter(|e| e.event_type == ChatEventType::TurnEnd).count();
        assert_eq!(turn_ends, 2);
    }

    #[test]
    fn duplicate_tool_result_lines_are_deduplicated() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x","content":"a"}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x","content":"a"}]}}"#,
        );
        let events = translate(&session_id, contents);
        assert_eq!(events.iter().filter(|e| e.event_type == ChatEventType::ToolResult).count(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let session_id = sid();
        let contents = "not json\n{\"type\":\"user\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}";
        let events = translate(&session_id, contents);
        assert!(events.iter().any(|e| e.event_type == ChatEventType::UserMessage));
    }
}
