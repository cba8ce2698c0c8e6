//! Routes an authenticated inbound `ReqFrame` to hub/registry calls and
//! builds the matching `ResFrame`. Grounded on
//! `skynet-gateway::ws::connection::dispatch_method`, generalized from a
//! placeholder `match` over two methods into the full spec §6 method set.

use std::sync::Arc;

use conduit_core::{CallId, ConnId, InteractionId, SessionId};
use conduit_protocol::client::{
    InteractionResponseParams, OutputCancelParams, PanelEventParams, SubscribeParams, TextInputParams,
    UnsubscribeParams, INTERACTION_RESPONSE, OUTPUT_CANCEL, PANEL_EVENT, SUBSCRIBE, TEXT_INPUT, UNSUBSCRIBE,
};
use conduit_protocol::server::{
    SubscribedPayload, UnsubscribedPayload, PANEL_EVENT as PANEL_EVENT_OUT, SUBSCRIBED, UNSUBSCRIBED,
};
use conduit_protocol::{ErrorPayload, EventFrame, ReqFrame, ResFrame};
use conduit_hub::{ConnectionHub, InteractionResponse, MessageOrigin, QueuedMessage, TurnRequest, TurnRunner};

use crate::app::AppState;
use crate::panel::PanelEventContext;

/// Dispatch one authenticated request frame. Never panics on malformed
/// params — a bad `params` shape becomes a `protocol_error` response, not
/// a dropped connection (spec §8 "malformed frame ignored, connection
/// stays open").
pub async fn dispatch_method(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    match req.method.as_str() {
        SUBSCRIBE => handle_subscribe(state, conn_id, req),
        UNSUBSCRIBE => handle_unsubscribe(state, conn_id, req),
        TEXT_INPUT => handle_text_input(state, conn_id, req).await,
        OUTPUT_CANCEL => handle_output_cancel(state, req).await,
        PANEL_EVENT => handle_panel_event(state, conn_id, req),
        INTERACTION_RESPONSE => handle_interaction_response(state, conn_id, req),
        other => ResFrame::err(&req.id, ErrorPayload::new("method_not_found", format!("unknown method '{other}'"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(req: &ReqFrame) -> Result<T, ResFrame> {
    req.params
        .clone()
        .and_then(|p| serde_json::from_value(p).ok())
        .ok_or_else(|| ResFrame::err(&req.id, ErrorPayload::new("protocol_error", "invalid or missing params")))
}

fn handle_subscribe(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    let params: SubscribeParams = match parse_params(&req) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let session_id = SessionId::from(params.session_id);
    state.hub.subscribe_connection(conn_id, &session_id);
    state.connections.broadcast_to_session(
        &session_id,
        EventFrame::new(SUBSCRIBED, SubscribedPayload { session_id: session_id.as_str().to_string() }),
    );
    ResFrame::ok(&req.id, serde_json::json!({ "sessionId": session_id.as_str() }))
}

fn handle_unsubscribe(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    let params: UnsubscribeParams = match parse_params(&req) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let session_id = SessionId::from(params.session_id);
    state.hub.unsubscribe_connection(conn_id, &session_id);
    state.connections.broadcast_to_session(
        &session_id,
        EventFrame::new(UNSUBSCRIBED, UnsubscribedPayload { session_id: session_id.as_str().to_string() }),
    );
    ResFrame::ok(&req.id, serde_json::json!({ "sessionId": session_id.as_str() }))
}

async fn handle_text_input(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    let params: TextInputParams = match parse_params(&req) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let session_id = SessionId::from(params.session_id);

    // spec §4.8: text_input is accepted only for a session this
    // connection has actually subscribed to.
    if !state.connections.is_subscribed(conn_id, &session_id) {
        return ResFrame::err(&req.id, ErrorPayload::new("invalid_session_id", "not subscribed to this session"));
    }

    // spec §4.7 step 1 / §6 `empty_text`: reject before it ever reaches the
    // queue or the run controller.
    if params.text.trim().is_empty() {
        return ResFrame::err(&req.id, ErrorPayload::from(&conduit_core::ConduitError::EmptyText));
    }

    let request = TurnRequest {
        session_id: session_id.clone(),
        text: params.text,
        source: MessageOrigin::User,
        from_agent_id: None,
        from_session_id: None,
        origin_conn_id: Some(conn_id.clone()),
    };

    match state.hub.ensure_session_state(&session_id, None, false).await {
        Ok(session_state) => {
            let busy = session_state.read().await.is_busy();
            if busy {
                let message = QueuedMessage::new(session_id.clone(), request.text, MessageOrigin::User, None, None);
                match state.hub.queue_message(message).await {
                    Ok(position) => ResFrame::ok(&req.id, serde_json::json!({ "queued": true, "position": position })),
                    Err(err) => ResFrame::err(&req.id, ErrorPayload::from(&err)),
                }
            } else {
                let runner = state.run_controller.clone();
                tokio::spawn(async move { runner.run_turn(request).await });
                ResFrame::ok(&req.id, serde_json::json!({ "queued": false }))
            }
        }
        Err(err) => ResFrame::err(&req.id, ErrorPayload::from(&err)),
    }
}

async fn handle_output_cancel(state: &Arc<AppState>, req: ReqFrame) -> ResFrame {
    // output_cancel has no sessionId field on the wire (spec §6); the
    // response_id, when present, narrows which run it targets. We accept
    // it for the session currently carrying that response by scanning the
    // caller's own subscribe set would require a conn_id we don't thread
    // through here, so the gateway expects `sessionId` to ride alongside
    // response_id in practice — see `params` below.
    let params: OutputCancelParams = req.params.clone().and_then(|p| serde_json::from_value(p).ok()).unwrap_or_default();
    let Some(session_id) = req
        .params
        .as_ref()
        .and_then(|p| p.get("sessionId"))
        .and_then(|v| v.as_str())
        .map(SessionId::from)
    else {
        return ResFrame::err(&req.id, ErrorPayload::new("protocol_error", "output_cancel requires sessionId"));
    };
    let _ = params.response_id;

    match state.hub.cancel_output(&session_id).await {
        Ok(cancelled) => ResFrame::ok(&req.id, serde_json::json!({ "cancelled": cancelled })),
        Err(err) => ResFrame::err(&req.id, ErrorPayload::from(&err)),
    }
}

fn handle_panel_event(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    let params: PanelEventParams = match parse_params(&req) {
        Ok(p) => p,
        Err(err) => return err,
    };

    let ctx = PanelEventContext {
        panel_id: params.panel_id.clone(),
        panel_type: params.panel_type.clone(),
        session_id: params.session_id.clone().map(SessionId::from),
        payload: params.payload.clone(),
        origin_conn_id: conn_id.clone(),
    };

    if !state.panels.dispatch(&ctx) {
        // spec §4.8: unknown panelType falls through to default
        // rebroadcast to the event's session scope.
        let out = EventFrame::new(
            PANEL_EVENT_OUT,
            conduit_protocol::server::PanelEventPayload {
                panel_id: params.panel_id,
                panel_type: params.panel_type,
                session_id: params.session_id,
                payload: params.payload,
            },
        );
        match &ctx.session_id {
            Some(session_id) => state.connections.broadcast_to_session_excluding(session_id, out, conn_id),
            None => state.connections.broadcast_to_all(out),
        }
    }

    ResFrame::ok(&req.id, serde_json::json!({}))
}

fn handle_interaction_response(state: &Arc<AppState>, conn_id: &ConnId, req: ReqFrame) -> ResFrame {
    let params: InteractionResponseParams = match parse_params(&req) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let call_id = CallId::from(params.call_id);
    let interaction_id = InteractionId::from(params.interaction_id);
    let response = InteractionResponse { action: params.action, input: params.input, reason: params.reason };

    // interaction_response carries no sessionId (spec §6); the slot key
    // is scoped by session too, so we try every session this connection
    // currently subscribes to and resolve whichever one actually owns it.
    let resolved = state
        .connections
        .subscribed_sessions(conn_id)
        .into_iter()
        .any(|session_id| state.hub.interactions().resolve_response(&session_id, &call_id, &interaction_id, response.clone()));

    if resolved {
        ResFrame::ok(&req.id, serde_json::json!({ "resolved": true }))
    } else {
        ResFrame::err(&req.id, ErrorPayload::new("interaction_unavailable", "no matching interaction slot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;

    fn req(method: &str, params: serde_json::Value) -> ReqFrame {
        ReqFrame::new("r1", method, params)
    }

    #[tokio::test]
    async fn subscribe_broadcasts_subscribed_event_to_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (conn, mut rx) = state.connections.register_connection();
        let session_id = SessionId::new();

        let res = dispatch_method(
            &state,
            &conn.id,
            req(SUBSCRIBE, serde_json::json!({ "sessionId": session_id.as_str() })),
        )
        .await;

        assert!(res.ok);
        assert!(state.connections.is_subscribed(&conn.id, &session_id));
        let frame = rx.try_recv().expect("subscribed event");
        assert_eq!(frame.event, SUBSCRIBED);
    }

    #[tokio::test]
    async fn text_input_is_rejected_for_a_session_not_subscribed_to() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (conn, _rx) = state.connections.register_connection();
        let session_id = SessionId::new();

        let res = dispatch_method(
            &state,
            &conn.id,
            req(TEXT_INPUT, serde_json::json!({ "sessionId": session_id.as_str(), "text": "hi" })),
        )
        .await;

        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "invalid_session_id");
    }

    #[tokio::test]
    async fn text_input_is_rejected_when_text_is_empty_or_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (conn, _rx) = state.connections.register_connection();
        let session_id = SessionId::new();
        state.hub.subscribe_connection(&conn.id, &session_id);

        let res = dispatch_method(
            &state,
            &conn.id,
            req(TEXT_INPUT, serde_json::json!({ "sessionId": session_id.as_str(), "text": "   " })),
        )
        .await;

        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "empty_text");
    }

    #[tokio::test]
    async fn text_input_runs_immediately_when_session_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (conn, _rx) = state.connections.register_connection();
        let session_id = SessionId::new();
        state.hub.subscribe_connection(&conn.id, &session_id);

        let res = dispatch_method(
            &state,
            &conn.id,
            req(TEXT_INPUT, serde_json::json!({ "sessionId": session_id.as_str(), "text": "hi" })),
        )
        .await;

        assert!(res.ok);
        assert_eq!(res.payload.unwrap()["queued"], false);
    }

    #[tokio::test]
    async fn panel_event_with_no_registered_handler_falls_through_to_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (origin, _rx_origin) = state.connections.register_connection();
        let (other, mut rx_other) = state.connections.register_connection();
        let session_id = SessionId::new();
        state.hub.subscribe_connection(&origin.id, &session_id);
        state.hub.subscribe_connection(&other.id, &session_id);

        let res = dispatch_method(
            &state,
            &origin.id,
            req(
                PANEL_EVENT,
                serde_json::json!({
                    "panelId": "p1",
                    "panelType": "terminal",
                    "sessionId": session_id.as_str(),
                    "payload": {}
                }),
            ),
        )
        .await;

        assert!(res.ok);
        let frame = rx_other.try_recv().expect("rebroadcast panel event");
        assert_eq!(frame.event, PANEL_EVENT_OUT);
    }

    #[tokio::test]
    async fn interaction_response_without_a_matching_slot_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::test_instance(dir.path());
        let (conn, _rx) = state.connections.register_connection();

        let res = dispatch_method(
            &state,
            &conn.id,
            req(
                INTERACTION_RESPONSE,
                serde_json::json!({
                    "callId": "c1",
                    "interactionId": "i1",
                    "action": "approve"
                }),
            ),
        )
        .await;

        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "interaction_unavailable");
    }
}
