//! The Multiplexed Connection (spec §4.8, component C8): one task per
//! physical socket, serializing inbound dispatch and fanning out
//! broadcasts. Grounded directly on
//! `skynet-gateway::ws::connection::{ws_handler, handle_connection,
//! process_message}`, generalized from that file's two-state
//! `AwaitingConnect`/`Authenticated`/`Closing` machine driven by a
//! `connect` method into one driven by `hello` (spec §6), and from a
//! single global broadcast receiver into the per-connection
//! `mpsc::UnboundedReceiver<EventFrame>` the Connection Registry hands
//! back on registration (subscriptions are per-session here, not
//! all-or-nothing).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use conduit_core::config::MAX_PAYLOAD_BYTES;
use conduit_protocol::client::HELLO;
use conduit_protocol::handshake::HelloParams;
use conduit_protocol::{ErrorPayload, InboundFrame, ResFrame};

use crate::app::AppState;
use crate::ws::dispatch::dispatch_method;
use crate::ws::handshake::hello_ok_payload;
use crate::ws::send::send_json;

/// `AwaitingConnect → Authenticated → Closing` (spec §4.8). A connection
/// that never sends `hello` within the handshake deadline is dropped.
enum ConnState {
    AwaitingConnect,
    Authenticated,
    Closing,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (conn, mut events_rx) = state.connections.register_connection();
    let conn_id = conn.id.clone();
    info!(conn_id = %conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();
    let mut conn_state = ConnState::AwaitingConnect;

    let handshake_deadline =
        tokio::time::Instant::now() + Duration::from_millis(state.config.timeouts.handshake_timeout_ms);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(handshake_deadline));

    let mut tick_interval = tokio::time::interval(Duration::from_secs(state.config.timeouts.heartbeat_interval_secs));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // inbound frames are handled strictly in arrival order — no
            // concurrent dispatch for a single connection (spec §4.8).
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id = %conn_id, size = text_ref.len(), "payload too large, dropping");
                            break;
                        }
                        conn_state = process_message(&conn_id, text_ref, conn_state, &mut tx, &state).await;
                        if matches!(conn_state, ConnState::Closing) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            // fan-out from the Connection Registry — only subscribed
            // sessions' events reach this channel.
            event = events_rx.recv() => {
                match event {
                    Some(frame) => {
                        if send_json(&mut tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = tick_interval.tick() => {
                if matches!(conn_state, ConnState::Authenticated) {
                    let tick = conduit_protocol::EventFrame::new(
                        "tick",
                        serde_json::json!({ "ts": conduit_core::types::now_rfc3339() }),
                    );
                    if send_json(&mut tx, &tick).await.is_err() {
                        break;
                    }
                }
            }

            _ = &mut handshake_timer => {
                if matches!(conn_state, ConnState::AwaitingConnect) {
                    warn!(conn_id = %conn_id, "handshake timeout, closing connection");
                    break;
                }
            }
        }
    }

    state.hub.detach_connection_all(&conn_id);
    state.connections.unregister_connection(&conn_id);
    info!(conn_id = %conn_id, "WS connection closed");
}

async fn process_message(
    conn_id: &conduit_core::ConnId,
    text: &str,
    state: ConnState,
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    app: &Arc<AppState>,
) -> ConnState {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "malformed frame, ignoring");
            return state;
        }
    };

    match state {
        ConnState::AwaitingConnect => {
            let Some(req) = frame.as_req() else {
                return ConnState::AwaitingConnect;
            };

            if req.method != HELLO {
                let res = ResFrame::err(&req.id, ErrorPayload::new("protocol_error", "must send hello first"));
                let _ = send_json(tx, &res).await;
                return ConnState::AwaitingConnect;
            }

            let Some(params) = req.params.clone().and_then(|p| serde_json::from_value::<HelloParams>(p).ok()) else {
                let res = ResFrame::err(&req.id, ErrorPayload::new("protocol_error", "invalid hello params"));
                let _ = send_json(tx, &res).await;
                return ConnState::Closing;
            };

            let requested = params.session_id.map(conduit_core::SessionId::from);
            let attach = app.hub.attach_connection(conn_id, requested.as_ref(), false).await;
            let session_state = match attach {
                Ok(s) => s,
                Err(e) => {
                    let res = ResFrame::err(&req.id, ErrorPayload::from(&e));
                    let _ = send_json(tx, &res).await;
                    return ConnState::Closing;
                }
            };

            let snapshot = {
                let guard = session_state.read().await;
                serde_json::to_value(&guard.summary).unwrap_or(serde_json::Value::Null)
            };
            let hello = hello_ok_payload(&app.node_id, snapshot);
            let res = ResFrame::ok(&req.id, hello);
            let _ = send_json(tx, &res).await;
            info!(conn_id = %conn_id, "client authenticated");
            ConnState::Authenticated
        }

        ConnState::Authenticated => {
            if let Some(req) = frame.as_req() {
                let res = dispatch_method(app, conn_id, req).await;
                let _ = send_json(tx, &res).await;
            }
            ConnState::Authenticated
        }

        ConnState::Closing => ConnState::Closing,
    }
}
