//! Builds the `hello-ok` response payload. Grounded on
//! `skynet-gateway::ws::handshake::{verify_auth, hello_ok_payload}`.
//!
//! Authentication verification is an external collaborator's concern
//! (spec §1 Out-of-scope: "auth/identity verification"); this gateway
//! accepts any `AuthPayload` the client presents and leaves wiring a real
//! `AuthVerifier` to the deployment. `session_id` on the snapshot is the
//! caller's `attach_connection` target, already resolved by the time this
//! runs.

use conduit_core::config::{HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES, PROTOCOL_VERSION};
use conduit_protocol::handshake::{ClientPolicy, HelloOk, ServerFeatures, ServerInfo};
use serde_json::Value;

pub fn hello_ok_payload(node_id: &str, snapshot: Value) -> HelloOk {
    HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            name: "conduit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: node_id.to_string(),
        },
        features: ServerFeatures {
            streaming: true,
            tool_calls: true,
            interaction_rendezvous: true,
            panel_events: true,
        },
        snapshot,
        policy: ClientPolicy {
            max_message_size: MAX_PAYLOAD_BYTES,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
        },
    }
}
