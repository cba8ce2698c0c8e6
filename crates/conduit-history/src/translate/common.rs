use std::collections::HashSet;

use serde_json::{json, Value};

use conduit_core::SessionId;
use conduit_events::{ChatEvent, ChatEventType};

/// Shared turn-bookkeeping for the external-CLI translators (spec §9:
/// "share a common token-mapping utility"). Tracks whether a turn is
/// currently open and deduplicates tool call/result ids so re-scanning a
/// file segment never emits the same event twice.
pub struct TurnTracker<'a> {
    session_id: &'a SessionId,
    out: Vec<ChatEvent>,
    in_turn: bool,
    seen_tool_calls: HashSet<String>,
    seen_tool_results: HashSet<String>,
}

impl<'a> TurnTracker<'a> {
    pub fn new(session_id: &'a SessionId) -> Self {
        Self {
            session_id,
            out: Vec::new(),
            in_turn: false,
            seen_tool_calls: HashSet::new(),
            seen_tool_results: HashSet::new(),
        }
    }

    pub fn open_turn(&mut self) {
        if !self.in_turn {
            self.push(ChatEventType::TurnStart, json!({ "trigger": "user" }));
            self.in_turn = true;
        }
    }

    pub fn close_turn(&mut self) {
        if self.in_turn {
            self.push(ChatEventType::TurnEnd, json!({}));
            self.in_turn = false;
        }
    }

    /// A summary/compaction entry gets its own turn, per spec §4.2: close
    /// whatever was open, bracket the one event in a fresh turn, and leave
    /// the tracker closed so the next real turn starts cleanly.
    pub fn standalone_turn(&mut self, event_type: ChatEventType, payload: Value) {
        self.close_turn();
        self.push(ChatEventType::TurnStart, json!({ "trigger": "system" }));
        self.push(event_type, payload);
        self.push(ChatEventType::TurnEnd, json!({}));
    }

    pub fn push(&mut self, event_type: ChatEventType, payload: Value) {
        self.out.push(ChatEvent::new(self.session_id.clone(), event_type, payload));
    }

    pub fn push_tool_call(&mut self, call_id: &str, tool_name: &str, arguments: Value) {
        if self.seen_tool_calls.insert(call_id.to_string()) {
            self.push(
                ChatEventType::ToolCall,
                json!({ "callId": call_id, "toolName": tool_name, "arguments": arguments }),
            );
        }
    }

    pub fn push_tool_result(&mut self, call_id: &str, ok: bool, body: Value) {
        if self.seen_tool_results.insert(call_id.to_string()) {
            let mut payload = json!({ "callId": call_id, "ok": ok });
            if ok {
                payload["result"] = body;
            } else {
                payload["error"] = body;
            }
            self.push(ChatEventType::ToolResult, payload);
        }
    }

    pub fn finish(mut self) -> Vec<ChatEvent> {
        self.close_turn();
        self.out
    }
}
