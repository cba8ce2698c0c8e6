//! Run Controller (spec §4.7, component C7). Grounded on
//! `skynet-agent::tools::tool_loop::run_tool_loop`'s stream→tool-call→
//! restream cycle, generalized from a single in-process call into the
//! broadcast/persist/cancel machinery the hub's `LogicalSessionState`
//! needs. The provider call itself is delegated to an injected
//! [`crate::llm_stream::LlmStream`] rather than `skynet-agent`'s concrete
//! `LlmProvider`, per the consumed-capability boundary this workspace uses
//! to keep `conduit-hub` free of a dependency on any one SDK.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use conduit_core::{AgentId, CallId, ConduitConfig, ConduitError, ResponseId, Result, SessionId, TurnId};
use conduit_events::{ChatEvent, ChatEventType, EventStore};
use conduit_history::{ChatCompletionMessage, ChatRole, HistoryProviderRegistry, MessageMeta, MessageSource, ToolCallSpec, Visibility};
use conduit_hub::{ActiveChatRun, ActiveToolCall, LogicalSessionState, MessageOrigin, QueuedMessage, SessionHub, TurnRequest, TurnRunner};
use conduit_protocol::server::{
    OutputCancelledPayload, TextDeltaPayload, TextDonePayload, ThinkingDeltaPayload, ThinkingDonePayload,
    ToolCallPayload, ToolResultPayload, UserMessagePayload, OUTPUT_CANCELLED, TEXT_DELTA, TEXT_DONE, THINKING_DELTA,
    THINKING_DONE, THINKING_START, TOOL_CALL, TOOL_RESULT, USER_MESSAGE,
};
use conduit_protocol::EventFrame;

use crate::llm_stream::{LlmStream, LlmStreamEvent, LlmTurnRequest};
use crate::tool_host::{ToolCallOutcome, ToolHost};

/// How one stream round ended, driving the next step in `run_turn_inner`'s
/// `tool_loop ↔ streaming` cycle (spec §4.7 state machine).
enum RoundOutcome {
    /// Stream finished with no pending tool calls; finalize the turn.
    Finished,
    /// Stream produced tool calls with `round_text` alongside them; run the
    /// calls, extend the chat history, then restream.
    ToolCalls { calls: Vec<(CallId, String, serde_json::Value)>, round_text: String },
    /// Cancel token fired. `any_output` distinguishes "nothing happened
    /// yet" (undo the just-pushed user message) from "partial output
    /// exists" (flush a partial, `interrupted` `text_done`).
    Cancelled { any_output: bool },
    UpstreamError(String),
}

/// Executes one turn per [`TurnRunner::run_turn`] invocation (component
/// C7). Holds the three consumed capabilities (LLM stream, tool host,
/// history registry) plus the hub it drives turns through; everything
/// else — queueing, cancellation tokens, the per-session busy flag — lives
/// in the `LogicalSessionState` the hub hands back.
pub struct RunController {
    hub: Arc<SessionHub>,
    event_store: Arc<EventStore>,
    #[allow(dead_code)]
    history: Arc<HistoryProviderRegistry>,
    llm: Arc<dyn LlmStream>,
    tools: Arc<dyn ToolHost>,
    config: Arc<ConduitConfig>,
}

impl RunController {
    pub fn new(
        hub: Arc<SessionHub>,
        event_store: Arc<EventStore>,
        history: Arc<HistoryProviderRegistry>,
        llm: Arc<dyn LlmStream>,
        tools: Arc<dyn ToolHost>,
        config: Arc<ConduitConfig>,
    ) -> Self {
        Self { hub, event_store, history, llm, tools, config }
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn run_turn_inner(&self, request: TurnRequest) -> Result<()> {
        let TurnRequest { session_id, text, source, from_agent_id, from_session_id, origin_conn_id } = request;

        if text.trim().is_empty() {
            tracing::warn!(%session_id, "dropping turn request with empty text");
            return Ok(());
        }

        let state = self.hub.ensure_session_state(&session_id, from_agent_id.as_ref(), false).await?;

        // step 1: reject deleted sessions; requeue if a run is already active.
        {
            let guard = state.read().await;
            if guard.deleted {
                tracing::warn!(%session_id, "dropping turn request for deleted session");
                return Ok(());
            }
            if guard.is_busy() {
                drop(guard);
                let mut message =
                    QueuedMessage::new(session_id.clone(), text, source, from_agent_id, from_session_id);
                message.origin_conn_id = origin_conn_id;
                self.hub.queue_message(message).await?;
                return Ok(());
            }
        }

        let meta = MessageMeta {
            source: message_source(source),
            from_agent_id: from_agent_id.as_ref().map(|a| a.as_str().to_string()),
            from_session_id: from_session_id.as_ref().map(|s| s.as_str().to_string()),
            visibility: Visibility::Visible,
        };
        let turn_id = TurnId::new();

        // step 2: broadcast user_message to all other subscribers.
        let user_payload = UserMessagePayload {
            session_id: session_id.as_str().to_string(),
            turn_id: Some(turn_id.as_str().to_string()),
            text: text.clone(),
            meta: Some(serde_json::to_value(&meta)?),
        };
        match &origin_conn_id {
            Some(conn) => {
                self.hub
                    .broadcast_to_session_excluding(&session_id, EventFrame::new(USER_MESSAGE, user_payload), conn);
            }
            None => self.hub.broadcast_to_session(&session_id, EventFrame::new(USER_MESSAGE, user_payload)),
        }

        // step 3: persist turn_start + user_message, batched.
        let turn_start = ChatEvent::new(session_id.clone(), ChatEventType::TurnStart, json!({"trigger": "user"}))
            .with_turn(turn_id.clone());
        let user_event = ChatEvent::new(session_id.clone(), ChatEventType::UserMessage, json!({ "text": text, "meta": meta }))
            .with_turn(turn_id.clone());
        self.event_store.append_batch(&session_id, vec![turn_start, user_event]).await?;

        // step 4: push the user message onto the cached chat history.
        {
            let mut guard = state.write().await;
            let mut msg = ChatCompletionMessage::user(text.clone());
            msg.meta = Some(meta);
            guard.chat_messages.push(msg);
        }

        // step 5: allocate the active run.
        let response_id = ResponseId::new();
        let cancel_token = {
            let mut guard = state.write().await;
            let mut run = ActiveChatRun::new(response_id.clone());
            run.turn_id = Some(turn_id.clone());
            let token = run.cancel_token.clone();
            guard.active_chat_run = Some(run);
            token
        };

        let agent_id = from_agent_id.unwrap_or_else(AgentId::main);
        let mut accumulated_text = String::new();
        let mut any_output = false;

        let outcome = loop {
            let messages = state.read().await.chat_messages.clone();
            let round = self
                .run_stream_round(&session_id, &agent_id, messages, &response_id, &cancel_token, &state, &mut accumulated_text)
                .await?;

            match round {
                RoundOutcome::ToolCalls { calls, round_text } => {
                    any_output = true;
                    self.extend_with_tool_round(&state, &calls, &round_text).await;
                    self.run_tool_calls(&session_id, &response_id, &state, calls).await?;
                    if cancel_token.is_cancelled() {
                        break RoundOutcome::Cancelled { any_output };
                    }
                    continue;
                }
                RoundOutcome::Finished => break RoundOutcome::Finished,
                RoundOutcome::Cancelled { any_output: round_had_output } => {
                    break RoundOutcome::Cancelled { any_output: any_output || round_had_output }
                }
                RoundOutcome::UpstreamError(message) => break RoundOutcome::UpstreamError(message),
            }
        };

        self.finalize(&session_id, &turn_id, &response_id, &state, accumulated_text, outcome).await
    }

    /// Steps 6: stream one assistant response, broadcasting/persisting
    /// deltas and tool calls as they arrive.
    #[allow(clippy::too_many_arguments)]
    async fn run_stream_round(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        messages: Vec<ChatCompletionMessage>,
        response_id: &ResponseId,
        cancel_token: &CancellationToken,
        state: &Arc<RwLock<LogicalSessionState>>,
        accumulated_text: &mut String,
    ) -> Result<RoundOutcome> {
        let (tx, mut rx) = mpsc::channel(64);
        let turn_request = LlmTurnRequest {
            session_id: session_id.clone(),
            provider: agent_id.as_str().to_string(),
            agent: agent_id.clone(),
            messages,
            tools: self.tools.tool_definitions(session_id),
        };

        let llm = self.llm.clone();
        let stream_cancel = cancel_token.clone();
        let stream_handle = tokio::spawn(async move { llm.stream_turn(turn_request, tx, stream_cancel).await });

        let mut tool_calls = Vec::new();
        let mut round_text = String::new();
        let mut thinking_buf = String::new();
        let mut text_started = false;
        let mut upstream_error: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                LlmStreamEvent::TextDelta(delta) => {
                    accumulated_text.push_str(&delta);
                    round_text.push_str(&delta);
                    if !text_started {
                        text_started = true;
                        let mut guard = state.write().await;
                        if let Some(run) = &mut guard.active_chat_run {
                            run.text_started_at = Some(conduit_core::types::now_rfc3339());
                        }
                    }
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            TEXT_DELTA,
                            TextDeltaPayload {
                                session_id: session_id.as_str().to_string(),
                                response_id: response_id.as_str().to_string(),
                                delta,
                            },
                        ),
                    );
                    let mut guard = state.write().await;
                    if let Some(run) = &mut guard.active_chat_run {
                        run.accumulated_text = accumulated_text.clone();
                    }
                }
                LlmStreamEvent::ThinkingStart => {
                    thinking_buf.clear();
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(THINKING_START, json!({"sessionId": session_id.as_str(), "responseId": response_id.as_str()})),
                    );
                }
                LlmStreamEvent::ThinkingDelta(delta) => {
                    thinking_buf.push_str(&delta);
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            THINKING_DELTA,
                            ThinkingDeltaPayload {
                                session_id: session_id.as_str().to_string(),
                                response_id: response_id.as_str().to_string(),
                                delta,
                            },
                        ),
                    );
                }
                LlmStreamEvent::ThinkingEnd => {
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            THINKING_DONE,
                            ThinkingDonePayload {
                                session_id: session_id.as_str().to_string(),
                                response_id: response_id.as_str().to_string(),
                                text: thinking_buf.clone(),
                            },
                        ),
                    );
                    self.event_store
                        .append(
                            session_id,
                            ChatEvent::new(session_id.clone(), ChatEventType::ThinkingDone, json!({"text": thinking_buf}))
                                .with_response(response_id.clone()),
                        )
                        .await?;
                }
                LlmStreamEvent::ToolCall { call_id, tool_name, arguments } => {
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            TOOL_CALL,
                            ToolCallPayload {
                                session_id: session_id.as_str().to_string(),
                                response_id: response_id.as_str().to_string(),
                                call_id: call_id.as_str().to_string(),
                                tool_name: tool_name.clone(),
                                arguments: arguments.clone(),
                            },
                        ),
                    );
                    self.event_store
                        .append(
                            session_id,
                            ChatEvent::new(
                                session_id.clone(),
                                ChatEventType::ToolCall,
                                json!({"callId": call_id.as_str(), "toolName": tool_name, "arguments": arguments}),
                            )
                            .with_response(response_id.clone()),
                        )
                        .await?;
                    {
                        let mut guard = state.write().await;
                        if let Some(run) = &mut guard.active_chat_run {
                            run.active_tool_calls.insert(
                                call_id.clone(),
                                ActiveToolCall { call_id: call_id.clone(), tool_name: tool_name.clone(), args_json: arguments.clone() },
                            );
                        }
                    }
                    tool_calls.push((call_id, tool_name, arguments));
                }
                LlmStreamEvent::Error { aborted, message } => {
                    if !aborted {
                        upstream_error = Some(message);
                    }
                }
            }
        }
        let _ = stream_handle.await;

        if let Some(message) = upstream_error {
            return Ok(RoundOutcome::UpstreamError(message));
        }
        if cancel_token.is_cancelled() {
            let any_output = !round_text.is_empty() || !tool_calls.is_empty();
            return Ok(RoundOutcome::Cancelled { any_output });
        }
        if !tool_calls.is_empty() {
            return Ok(RoundOutcome::ToolCalls { calls: tool_calls, round_text });
        }
        Ok(RoundOutcome::Finished)
    }

    /// Mirrors `conduit_history::projection::project_to_chat_messages`'s
    /// tool-call grouping: one synthetic assistant message carrying every
    /// call this round plus any text emitted alongside it.
    async fn extend_with_tool_round(
        &self,
        state: &Arc<RwLock<LogicalSessionState>>,
        calls: &[(CallId, String, serde_json::Value)],
        round_text: &str,
    ) {
        let mut msg = ChatCompletionMessage::assistant(round_text.to_string());
        for (call_id, tool_name, arguments) in calls {
            msg.tool_calls.push(ToolCallSpec { id: call_id.as_str().to_string(), name: tool_name.clone(), arguments: arguments.clone() });
        }
        state.write().await.chat_messages.push(msg);
    }

    /// Step 7: execute pending tool calls in sequence; result order
    /// matches call order both in the event log and the chat history.
    async fn run_tool_calls(
        &self,
        session_id: &SessionId,
        response_id: &ResponseId,
        state: &Arc<RwLock<LogicalSessionState>>,
        calls: Vec<(CallId, String, serde_json::Value)>,
    ) -> Result<()> {
        for (call_id, tool_name, arguments) in calls {
            let cancelled = {
                let guard = state.read().await;
                guard.active_chat_run.as_ref().map(|r| r.cancel_token.is_cancelled()).unwrap_or(true)
            };
            if cancelled {
                break;
            }

            // A tool call is a child deadline of the run's own cancellation
            // (spec §5 suspension points); it does not cancel the run, it
            // just surfaces as a failed result if the tool never returns.
            let timeout = std::time::Duration::from_millis(self.config.timeouts.tool_call_timeout_ms);
            let outcome = tokio::time::timeout(timeout, self.tools.call_tool(session_id, &call_id, &tool_name, arguments.clone())).await;
            let (ok, result, error) = match outcome {
                Ok(Ok(ToolCallOutcome::Ok(value))) => (true, Some(value), None),
                Ok(Ok(ToolCallOutcome::Err(message))) => (false, None, Some(json!({"message": message}))),
                Ok(Err(err)) => (false, None, Some(json!({"code": err.code(), "message": err.to_string()}))),
                Err(_) => (false, None, Some(json!({"code": "timeout", "message": "tool call timed out"}))),
            };

            self.event_store
                .append(
                    session_id,
                    ChatEvent::new(
                        session_id.clone(),
                        ChatEventType::ToolResult,
                        json!({"callId": call_id.as_str(), "ok": ok, "result": result, "error": error}),
                    )
                    .with_response(response_id.clone()),
                )
                .await?;
            self.hub.broadcast_to_session(
                session_id,
                EventFrame::new(
                    TOOL_RESULT,
                    ToolResultPayload { session_id: session_id.as_str().to_string(), call_id: call_id.as_str().to_string(), ok, result: result.clone(), error: error.clone() },
                ),
            );

            let body = if ok {
                json!({"ok": true, "result": result.unwrap_or(serde_json::Value::Null)})
            } else {
                json!({"ok": false, "error": error.unwrap_or(serde_json::Value::Null)})
            };
            {
                let mut guard = state.write().await;
                if let Some(run) = &mut guard.active_chat_run {
                    run.active_tool_calls.remove(&call_id);
                }
                guard.chat_messages.push(ChatCompletionMessage::tool(call_id.as_str().to_string(), body.to_string()));
            }
        }
        Ok(())
    }

    /// Steps 8-9 plus the cancellation branches of §4.7.
    async fn finalize(
        &self,
        session_id: &SessionId,
        turn_id: &TurnId,
        response_id: &ResponseId,
        state: &Arc<RwLock<LogicalSessionState>>,
        accumulated_text: String,
        outcome: RoundOutcome,
    ) -> Result<()> {
        match outcome {
            RoundOutcome::Finished => {
                self.hub.broadcast_to_session(
                    session_id,
                    EventFrame::new(
                        TEXT_DONE,
                        TextDonePayload {
                            session_id: session_id.as_str().to_string(),
                            response_id: response_id.as_str().to_string(),
                            text: accumulated_text.clone(),
                            interrupted: false,
                        },
                    ),
                );
                self.event_store
                    .append_batch(
                        session_id,
                        vec![
                            ChatEvent::new(session_id.clone(), ChatEventType::AssistantDone, json!({"text": accumulated_text.clone()}))
                                .with_turn(turn_id.clone())
                                .with_response(response_id.clone()),
                            ChatEvent::new(session_id.clone(), ChatEventType::TurnEnd, json!({})).with_turn(turn_id.clone()),
                        ],
                    )
                    .await?;
                let mut guard = state.write().await;
                guard.chat_messages.push(ChatCompletionMessage::assistant(accumulated_text));
                guard.active_chat_run = None;
            }
            RoundOutcome::Cancelled { any_output: false } => {
                // Aborted before any assistant text/tool call: undo the
                // in-memory user message so the next turn isn't two
                // consecutive user entries (spec §4.7 cancellation
                // semantics, first bullet).
                let mut guard = state.write().await;
                if matches!(guard.chat_messages.last(), Some(m) if m.role == ChatRole::User) {
                    guard.chat_messages.pop();
                }
                guard.active_chat_run = None;
            }
            RoundOutcome::Cancelled { any_output: true } => {
                let output_cancelled = {
                    let guard = state.read().await;
                    guard.active_chat_run.as_ref().map(|r| r.output_cancelled).unwrap_or(false)
                };

                self.hub.broadcast_to_session(
                    session_id,
                    EventFrame::new(
                        TEXT_DONE,
                        TextDonePayload {
                            session_id: session_id.as_str().to_string(),
                            response_id: response_id.as_str().to_string(),
                            text: accumulated_text.clone(),
                            interrupted: true,
                        },
                    ),
                );
                if output_cancelled {
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            OUTPUT_CANCELLED,
                            OutputCancelledPayload { session_id: session_id.as_str().to_string(), response_id: response_id.as_str().to_string() },
                        ),
                    );
                }

                // Implicit aborts (session switch, not an explicit
                // `output_cancel`) leave any dangling tool calls
                // unresolved rather than marking them interrupted.
                let pending: Vec<CallId> = if output_cancelled {
                    let guard = state.read().await;
                    guard.active_chat_run.as_ref().map(|r| r.active_tool_calls.keys().cloned().collect()).unwrap_or_default()
                } else {
                    Vec::new()
                };
                for call_id in &pending {
                    self.event_store
                        .append(
                            session_id,
                            ChatEvent::new(
                                session_id.clone(),
                                ChatEventType::ToolResult,
                                json!({"callId": call_id.as_str(), "ok": false, "error": {"code": "interrupted"}}),
                            )
                            .with_response(response_id.clone()),
                        )
                        .await?;
                    self.hub.broadcast_to_session(
                        session_id,
                        EventFrame::new(
                            TOOL_RESULT,
                            ToolResultPayload {
                                session_id: session_id.as_str().to_string(),
                                call_id: call_id.as_str().to_string(),
                                ok: false,
                                result: None,
                                error: Some(json!({"code": "interrupted"})),
                            },
                        ),
                    );
                }

                self.event_store
                    .append_batch(
                        session_id,
                        vec![
                            ChatEvent::new(
                                session_id.clone(),
                                ChatEventType::AssistantDone,
                                json!({"text": accumulated_text.clone(), "interrupted": true}),
                            )
                            .with_turn(turn_id.clone())
                            .with_response(response_id.clone()),
                            ChatEvent::new(session_id.clone(), ChatEventType::Interrupt, json!({"outputCancelled": output_cancelled}))
                                .with_turn(turn_id.clone()),
                            ChatEvent::new(session_id.clone(), ChatEventType::TurnEnd, json!({})).with_turn(turn_id.clone()),
                        ],
                    )
                    .await?;

                let mut guard = state.write().await;
                guard.chat_messages.push(ChatCompletionMessage::assistant(accumulated_text));
                guard.active_chat_run = None;
            }
            RoundOutcome::UpstreamError(message) => {
                tracing::error!(%session_id, %message, "upstream provider error");
                self.event_store
                    .append(
                        session_id,
                        ChatEvent::new(session_id.clone(), ChatEventType::Interrupt, json!({"upstreamError": message})).with_turn(turn_id.clone()),
                    )
                    .await?;
                state.write().await.active_chat_run = None;
                self.hub.process_next_queued_message(session_id).await;
                return Err(ConduitError::UpstreamError("turn aborted by upstream error".to_string()));
            }
        }

        self.hub.process_next_queued_message(session_id).await;
        Ok(())
    }
}

fn message_source(source: MessageOrigin) -> MessageSource {
    match source {
        MessageOrigin::User => MessageSource::User,
        MessageOrigin::Agent => MessageSource::Agent,
    }
}

#[async_trait]
impl TurnRunner for RunController {
    async fn run_turn(&self, request: TurnRequest) {
        if let Err(err) = self.run_turn_inner(request).await {
            tracing::error!(error = %err, "run_turn failed");
        }
    }
}

/// Exercises the state machine against the literal end-to-end scenarios of
/// spec §8, using in-memory stores and scripted `LlmStream`/`ToolHost`
/// doubles instead of any real provider or tool (both are out of scope per
/// spec §1 and consumed only as traits).
#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use conduit_core::{ConnId, SessionId};
    use conduit_history::HistoryProviderRegistry;
    use conduit_hub::connection_hub::{ConnectionHub, InteractionSummary};
    use conduit_hub::SessionHub;
    use conduit_sessions::SessionIndex;

    use super::*;

    /// Records every broadcast so assertions can inspect the exact event
    /// sequence a session's subscribers would have observed.
    #[derive(Default)]
    struct RecordingHub {
        sent: StdMutex<Vec<(String, EventFrame)>>,
    }

    impl ConnectionHub for RecordingHub {
        fn subscribe(&self, _conn_id: &ConnId, _session_id: &SessionId) {}
        fn unsubscribe(&self, _conn_id: &ConnId, _session_id: &SessionId) {}
        fn unsubscribe_all(&self, _conn_id: &ConnId) {}
        fn subscriber_count(&self, _session_id: &SessionId) -> usize {
            0
        }
        fn interaction_summary(&self, _session_id: &SessionId) -> InteractionSummary {
            InteractionSummary::default()
        }
        fn set_interaction_capability(&self, _conn_id: &ConnId, _supported: bool, _enabled: bool) {}
        fn broadcast_to_session(&self, session_id: &SessionId, event: EventFrame) {
            self.sent.lock().unwrap().push((session_id.as_str().to_string(), event));
        }
        fn broadcast_to_session_excluding(&self, session_id: &SessionId, event: EventFrame, _exclude: &ConnId) {
            self.sent.lock().unwrap().push((session_id.as_str().to_string(), event));
        }
        fn broadcast_to_all(&self, event: EventFrame) {
            self.sent.lock().unwrap().push(("*".to_string(), event));
        }
    }

    /// Streams a fixed script of events, ignoring the request content,
    /// stopping early if the run's cancel token fires mid-script.
    /// Emits its script on the first call only; every subsequent round
    /// (e.g. the restream after a tool-call round) ends immediately so the
    /// controller's `tool_loop ↔ streaming` cycle terminates.
    struct ScriptedLlm {
        script: Vec<LlmStreamEvent>,
        called: std::sync::atomic::AtomicBool,
    }

    impl ScriptedLlm {
        fn once(script: Vec<LlmStreamEvent>) -> Self {
            Self { script, called: std::sync::atomic::AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl LlmStream for ScriptedLlm {
        async fn stream_turn(
            &self,
            _request: LlmTurnRequest,
            tx: mpsc::Sender<LlmStreamEvent>,
            cancel: CancellationToken,
        ) -> Result<()> {
            if self.called.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(());
            }
            for event in &self.script {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if tx.send(event.clone()).await.is_err() {
                    return Ok(());
                }
            }
            Ok(())
        }
    }

    /// Sends one delta, then fires the run's own cancel token (the same
    /// token the controller checks after the stream drains) to exercise
    /// the "partial output, cancelled mid-stream" path (spec §8 scenario 3).
    struct CancelAfterFirstDelta;

    #[async_trait]
    impl LlmStream for CancelAfterFirstDelta {
        async fn stream_turn(
            &self,
            _request: LlmTurnRequest,
            tx: mpsc::Sender<LlmStreamEvent>,
            cancel: CancellationToken,
        ) -> Result<()> {
            let _ = tx.send(LlmStreamEvent::TextDelta("he".to_string())).await;
            cancel.cancel();
            Ok(())
        }
    }

    /// Fires the run's cancel token before emitting anything — the
    /// pre-stream cancel scenario (spec §8 scenario 4).
    struct CancelBeforeAnyOutput;

    #[async_trait]
    impl LlmStream for CancelBeforeAnyOutput {
        async fn stream_turn(
            &self,
            _request: LlmTurnRequest,
            _tx: mpsc::Sender<LlmStreamEvent>,
            cancel: CancellationToken,
        ) -> Result<()> {
            cancel.cancel();
            Ok(())
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolHost for NoTools {
        async fn call_tool(
            &self,
            _session_id: &SessionId,
            _call_id: &CallId,
            tool_name: &str,
            _arguments: serde_json::Value,
        ) -> Result<ToolCallOutcome> {
            Err(ConduitError::ToolNotFound { name: tool_name.to_string() })
        }

        fn tool_definitions(&self, _session_id: &SessionId) -> Vec<crate::llm_stream::ToolSpec> {
            Vec::new()
        }
    }

    /// Always resolves the one call scripted into it with a canned value.
    struct EchoTool;

    #[async_trait]
    impl ToolHost for EchoTool {
        async fn call_tool(
            &self,
            _session_id: &SessionId,
            _call_id: &CallId,
            _tool_name: &str,
            arguments: serde_json::Value,
        ) -> Result<ToolCallOutcome> {
            Ok(ToolCallOutcome::Ok(arguments))
        }

        fn tool_definitions(&self, _session_id: &SessionId) -> Vec<crate::llm_stream::ToolSpec> {
            Vec::new()
        }
    }

    fn test_config() -> Arc<ConduitConfig> {
        Arc::new(ConduitConfig::default())
    }

    fn make_controller(llm: Arc<dyn LlmStream>, tools: Arc<dyn ToolHost>) -> (Arc<RunController>, Arc<SessionHub>, Arc<EventStore>) {
        let event_store = Arc::new(EventStore::in_memory().unwrap());
        let session_index = Arc::new(SessionIndex::in_memory().unwrap());
        let history = Arc::new(HistoryProviderRegistry::new().register(Box::new(
            conduit_history::EventStoreHistoryProvider::new(event_store.clone()),
        )));
        let connections: Arc<dyn conduit_hub::connection_hub::ConnectionHub> = Arc::new(RecordingHub::default());
        let hub = Arc::new(SessionHub::new(test_config(), session_index, event_store.clone(), history.clone(), connections, None));
        let controller = Arc::new(RunController::new(hub.clone(), event_store.clone(), history, llm, tools, test_config()));
        hub.set_turn_runner(controller.clone());
        (controller, hub, event_store)
    }

    fn event_types(events: &[ChatEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    #[tokio::test]
    async fn simple_turn_produces_expected_event_log_and_broadcasts() {
        let llm: Arc<dyn LlmStream> =
            Arc::new(ScriptedLlm::once(vec![LlmStreamEvent::TextDelta("h".to_string()), LlmStreamEvent::TextDelta("ello".to_string())]));
        let (controller, _hub, event_store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "hi".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        let events = event_store.get_events(&session_id).unwrap();
        assert_eq!(
            event_types(&events),
            vec!["turn_start", "user_message", "assistant_done", "turn_end"]
        );
        assert_eq!(events[2].payload["text"], "hello");
    }

    #[tokio::test]
    async fn busy_session_queues_instead_of_running_a_second_turn() {
        let llm: Arc<dyn LlmStream> = Arc::new(ScriptedLlm::once(vec![]));
        let (controller, hub, _store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        let state = hub.ensure_session_state(&session_id, None, false).await.unwrap();
        {
            let mut guard = state.write().await;
            guard.active_chat_run = Some(ActiveChatRun::new(ResponseId::new()));
        }

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "next".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        let guard = state.read().await;
        assert_eq!(guard.queue.len(), 1);
        assert_eq!(guard.queue.front().unwrap().text, "next");
        assert!(guard.is_busy(), "queueing must not disturb the already-active run");
    }

    #[tokio::test]
    async fn cancel_mid_stream_flushes_partial_text_without_a_turn_end() {
        let llm: Arc<dyn LlmStream> = Arc::new(CancelAfterFirstDelta);
        let (controller, _hub, event_store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "hi".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        let events = event_store.get_events(&session_id).unwrap();
        assert_eq!(event_types(&events), vec!["turn_start", "user_message", "assistant_done", "interrupt", "turn_end"]);
        assert_eq!(events[2].payload["text"], "he");
        assert_eq!(events[2].payload["interrupted"], true);
    }

    #[tokio::test]
    async fn cancel_before_any_output_pops_the_pending_user_message() {
        let llm: Arc<dyn LlmStream> = Arc::new(CancelBeforeAnyOutput);
        let (controller, hub, _store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "hi".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        let state = hub.ensure_session_state(&session_id, None, false).await.unwrap();
        let guard = state.read().await;
        assert!(guard.chat_messages.is_empty(), "the just-appended user message must be undone");
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn tool_call_round_trip_produces_paired_tool_result() {
        let call_id = CallId::new();
        let llm: Arc<dyn LlmStream> = Arc::new(ScriptedLlm::once(vec![LlmStreamEvent::ToolCall {
            call_id: call_id.clone(),
            tool_name: "echo".to_string(),
            arguments: json!({"x": 1}),
        }]));
        let (controller, _hub, event_store) = make_controller(llm, Arc::new(EchoTool));
        let session_id = SessionId::new();

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "use the tool".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        let events = event_store.get_events(&session_id).unwrap();
        assert_eq!(
            event_types(&events),
            vec!["turn_start", "user_message", "tool_call", "tool_result", "assistant_done", "turn_end"]
        );
        assert_eq!(events[2].payload["callId"], call_id.as_str());
        assert_eq!(events[3].payload["callId"], call_id.as_str());
        assert_eq!(events[3].payload["ok"], true);
    }

    #[tokio::test]
    async fn deleted_session_drops_the_turn_without_appending_events() {
        let llm: Arc<dyn LlmStream> = Arc::new(ScriptedLlm::once(vec![]));
        let (controller, hub, event_store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        let state = hub.ensure_session_state(&session_id, None, false).await.unwrap();
        state.write().await.deleted = true;

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "hi".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        assert!(event_store.get_events(&session_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_dropped_without_touching_any_state() {
        let llm: Arc<dyn LlmStream> = Arc::new(ScriptedLlm::once(vec![]));
        let (controller, _hub, event_store) = make_controller(llm, Arc::new(NoTools));
        let session_id = SessionId::new();

        controller
            .run_turn_inner(TurnRequest {
                session_id: session_id.clone(),
                text: "   ".to_string(),
                source: MessageOrigin::User,
                from_agent_id: None,
                from_session_id: None,
                origin_conn_id: None,
            })
            .await
            .unwrap();

        assert!(event_store.get_events(&session_id).unwrap().is_empty());
    }
}
