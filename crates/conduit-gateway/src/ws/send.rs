//! Serialize and send a frame over the WS sink. Grounded on
//! `skynet-gateway::ws::send::send_json`.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;

pub async fn send_json<T: serde::Serialize>(
    tx: &mut SplitSink<WebSocket, Message>,
    payload: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    tx.send(Message::Text(json.into())).await
}
