use serde::Deserialize;
use serde_json::Value;

use conduit_core::SessionId;
use conduit_events::{ChatEvent, ChatEventType};

use super::common::TurnTracker;

fn default_true() -> bool {
    true
}

/// One line of a Pi CLI session transcript. Unlike Claude's content-block
/// format, Pi entries carry an explicit `type` discriminator per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PiEntry {
    Session,
    Compaction {
        summary: String,
    },
    BranchSummary {
        summary: String,
    },
    CustomMessage {
        text: String,
        #[serde(default)]
        label: Option<String>,
    },
    ToolExecutionStart {
        call_id: String,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolExecutionUpdate {
        #[serde(default)]
        call_id: Option<String>,
    },
    ToolExecutionEnd {
        call_id: String,
        #[serde(default)]
        result: Value,
        #[serde(default = "default_true")]
        ok: bool,
    },
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: Value,
        #[serde(default = "default_true")]
        ok: bool,
    },
    Message {
        role: String,
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Translates a Pi CLI JSONL transcript into `ChatEvent`s (spec §4.2).
///
/// `compaction`/`branch_summary` become `summary_message` with a
/// `summaryType` tag; `custom_message` carries its optional `label`
/// straight through; `tool_execution_start`/`tool_execution_end` (and the
/// standalone `tool_result` variant some Pi builds emit instead) pair into
/// `tool_call`/`tool_result`; `message` entries map by role into
/// `user_message`/`assistant_done`, with a `toolResult` role handled the
/// same as a standalone `tool_result` line. `tool_execution_update` carries
/// only in-flight progress and has no chat-event counterpart.
pub fn translate(session_id: &SessionId, contents: &str) -> Vec<ChatEvent> {
    let mut tracker = TurnTracker::new(session_id);

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: PiEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) => continue,
        };

        match entry {
            PiEntry::Session => {}
            PiEntry::Compaction { summary } => {
                tracker.standalone_turn(
                    ChatEventType::SummaryMessage,
                    serde_json::json!({ "text": summary, "summaryType": "compaction" }),
                );
            }
            PiEntry::BranchSummary { summary } => {
                tracker.standalone_turn(
                    ChatEventType::SummaryMessage,
                    serde_json::json!({ "text": summary, "summaryType": "branch_summary" }),
                );
            }
            PiEntry::CustomMessage { text, label } => {
                tracker.open_turn();
                tracker.push(ChatEventType::CustomMessage, serde_json::json!({ "text": text, "label": label }));
            }
            PiEntry::ToolExecutionStart { call_id, tool_name, arguments } => {
                tracker.open_turn();
                tracker.push_tool_call(&call_id, &tool_name, arguments);
            }
            PiEntry::ToolExecutionUpdate { .. } => {}
            PiEntry::ToolExecutionEnd { call_id, result, ok } => {
                tracker.open_turn();
                tracker.push_tool_result(&call_id, ok, result);
            }
            PiEntry::ToolResult { call_id, result, ok } => {
                tracker.open_turn();
                tracker.push_tool_result(&call_id, ok, result);
            }
            PiEntry::Message { role, text } => {
                tracker.open_turn();
                match role.as_str() {
                    "user" => tracker.push(ChatEventType::UserMessage, serde_json::json!({ "text": text })),
                    "assistant" => tracker.push(ChatEventType::AssistantDone, serde_json::json!({ "text": text })),
                    "toolResult" => tracker.push_tool_result("", true, serde_json::json!({ "text": text })),
                    _ => {}
                }
            }
            PiEntry::Unknown => {}
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
    fn message_roles_map_to_standard_events() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"message","role":"user","text":"hi"}"#,
            "\n",
            r#"{"type":"message","role":"assistant","text":"hello"}"#,
        );
        let events = translate(&session_id, contents);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ChatEventType::TurnStart,
                ChatEventType::UserMessage,
                ChatEventType::AssistantDone,
                ChatEventType::TurnEnd,
            ]
        );
    }

    #[test]
    fn tool_execution_pairs_into_call_and_result() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"tool_execution_start","call_id":"c1","tool_name":"search","arguments":{"q":"x"}}"#,
            "\n",
            r#"{"type":"tool_execution_update","call_id":"c1"}"#,
            "\n",
            r#"{"type":"tool_execution_end","call_id":"c1","result":{"hits":1},"ok":true}"#,
        );
        let events = translate(&session_id, contents);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ChatEventType::TurnStart,
                ChatEventType::ToolCall,
                ChatEventType::ToolResult,
                ChatEventType::TurnEnd,
            ]
        );
    }

    #[test]
    fn compaction_and_branch_summary_get_distinct_summary_types() {
        let session_id = sid();
        let contents = concat!(
            r#"{"type":"compaction","summary":"shrunk"}"#,
            "\n",
            r#"{"type":"branch_summary","summary":"branch recap"}"#,
        );
        let events = translate(&session_id, contents);
        let summaries: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == ChatEventType::SummaryMessage)
            .map(|e| e.payload["summaryType"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(summaries, vec!["compaction", "branch_summary"]);
    }

    #[test]
    fn custom_message_carries_optional_label() {
        let session_id = sid();
        let contents = r#"{"type":"custom_message","text":"note","label":"debug"}"#;
        let events = translate(&session_id, contents);
        let custom = events.iter().find(|e| e.event_type == ChatEventType::CustomMessage).unwrap();
        assert_eq!(custom.payload["label"], "debug");
    }
}
