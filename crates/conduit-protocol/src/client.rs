//! Client → Server method names and request param shapes (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HELLO: &str = "hello";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const TEXT_INPUT: &str = "text_input";
pub const OUTPUT_CANCEL: &str = "output_cancel";
pub const PANEL_EVENT: &str = "panel_event";
pub const INTERACTION_RESPONSE: &str = "interaction_response";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInputParams {
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputCancelParams {
    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelEventParams {
    pub panel_id: String,
    pub panel_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub payload: Value,
}

/// `action` is provider-defined (`approve`, `deny`, `respond`, ...); kept as
/// a plain string rather than a closed enum since interaction kinds are a
/// plugin concern this crate does not own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponseParams {
    pub call_id: String,
    pub interaction_id: String,
    pub action: String,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}
