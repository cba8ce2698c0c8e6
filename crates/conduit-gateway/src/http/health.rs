//! Minimal liveness endpoint. Grounded on
//! `skynet-gateway::http::health::health_handler` — the HTTP surface
//! itself is out of scope (spec §1), this is just enough to let an
//! operator or a container orchestrator probe the process.

use axum::Json;
use serde_json::json;

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
