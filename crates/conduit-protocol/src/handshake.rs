use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server: `hello` request params (method `"hello"`, spec §6).
///
/// Authentication itself is an external collaborator's concern (spec §1
/// Out-of-scope); this crate only defines the wire shape a gateway
/// wires an `AuthVerifier` up to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: u32,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthPayload>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Discriminated auth payload — mode determines which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AuthPayload {
    Token { token: String },
    TrustedProxy { forwarded_user: String },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
}

/// Server → Client: successful `hello` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: ServerFeatures,
    /// Current session summaries visible to this connection, so the client
    /// can render a sidebar without a second round trip.
    pub snapshot: Value,
    pub policy: ClientPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerFeatures {
    pub streaming: bool,
    pub tool_calls: bool,
    pub interaction_rendezvous: bool,
    pub panel_events: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientPolicy {
    pub max_message_size: usize,
    pub heartbeat_interval_secs: u64,
}
