//! Central orchestrator (spec §4.6, component C6). Grounded on
//! `skynet-gateway::app::AppState`'s role as the single place that owns
//! both the connection-facing registries and the durable stores, plus
//! `skynet-agent::runtime`'s session-state caching.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::RwLock;
use tracing::instrument;

use conduit_core::{AgentId, CallId, ConduitConfig, ConduitError, ConnId, Result, SessionId};
use conduit_events::{ChatEvent, EventStore};
use conduit_history::{project_to_chat_messages, HistoryProviderRegistry, HistoryRequest};
use conduit_protocol::server::{
    MessageDequeuedPayload, MessageQueuedPayload, SessionClearedPayload, SessionDeletedPayload,
    SessionLifecyclePayload, MESSAGE_DEQUEUED, MESSAGE_QUEUED, SESSION_CLEARED, SESSION_CREATED, SESSION_DELETED,
    SESSION_UPDATED,
};
use conduit_protocol::EventFrame;
use conduit_sessions::{SessionIndex, SessionSummary};

use crate::connection_hub::{ConnectionHub, InteractionSummary};
use crate::interaction::InteractionRegistry;
use crate::rendezvous::{CliToolCallQuery, CliToolCallRecord, CliToolCallRendezvous};
use crate::turn_runner::{TurnRequest, TurnRunner};
use crate::types::{LogicalSessionState, QueuedMessage};
use crate::working_dir::WorkingDirResolver;

/// Everything the Session Hub needs, assembled once at startup and shared
/// behind an `Arc` by the gateway, the run controller, and tests.
pub struct SessionHub {
    config: Arc<ConduitConfig>,
    session_index: Arc<SessionIndex>,
    event_store: Arc<EventStore>,
    history: Arc<HistoryProviderRegistry>,
    connections: Arc<dyn ConnectionHub>,
    working_dir_resolver: Option<Arc<dyn WorkingDirResolver>>,

    sessions: DashMap<SessionId, Arc<RwLock<LogicalSessionState>>>,
    /// Front = least recently used. Guarded separately from `sessions`
    /// since eviction needs to scan/reorder it without holding a state
    /// lock.
    lru: SyncMutex<VecDeque<SessionId>>,

    /// Set post-construction by `conduit-runtime` once its `RunController`
    /// exists, breaking what would otherwise be a circular crate
    /// dependency (spec §1's consumed-capability pattern).
    turn_runner: SyncMutex<Option<Arc<dyn TurnRunner>>>,

    interactions: InteractionRegistry,
    rendezvous: CliToolCallRendezvous,
}

impl SessionHub {
    pub fn new(
        config: Arc<ConduitConfig>,
        session_index: Arc<SessionIndex>,
        event_store: Arc<EventStore>,
        history: Arc<HistoryProviderRegistry>,
        connections: Arc<dyn ConnectionHub>,
        working_dir_resolver: Option<Arc<dyn WorkingDirResolver>>,
    ) -> Self {
        Self {
            config,
            session_index,
            event_store,
            history,
            connections,
            working_dir_resolver,
            sessions: DashMap::new(),
            lru: SyncMutex::new(VecDeque::new()),
            turn_runner: SyncMutex::new(None),
            interactions: InteractionRegistry::new(),
            rendezvous: CliToolCallRendezvous::new(),
        }
    }

    pub fn set_turn_runner(&self, runner: Arc<dyn TurnRunner>) {
        *self.turn_runner.lock() = Some(runner);
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    pub fn session_index(&self) -> &Arc<SessionIndex> {
        &self.session_index
    }

    pub fn interactions(&self) -> &InteractionRegistry {
        &self.interactions
    }

    pub fn subscribe_to_events(&self, session_id: &SessionId) -> tokio::sync::broadcast::Receiver<ChatEvent> {
        self.event_store.subscribe(session_id)
    }

    /// Passthrough to the Connection Registry for the run controller's own
    /// broadcasts (text deltas, tool activity, ...) — the hub stays the
    /// single place that owns `Arc<dyn ConnectionHub>` (spec §4.4/§4.7).
    pub fn broadcast_to_session(&self, session_id: &SessionId, event: EventFrame) {
        self.connections.broadcast_to_session(session_id, event);
    }

    /// Same as above but excludes one connection — used to echo a user's
    /// own `text_input` to every *other* subscriber (spec §4.7 step 2).
    pub fn broadcast_to_session_excluding(&self, session_id: &SessionId, event: EventFrame, exclude: &ConnId) {
        self.connections.broadcast_to_session_excluding(session_id, event, exclude);
    }

    /// Appends an out-of-band `agent_callback` event directly to the log
    /// (spec §3 `ChatEvent` variant, §4.3 projection rule 5) — unlike a
    /// queued turn this does not start a run; it is a notification from
    /// one agent's session into another's, observed the next time that
    /// session's history is folded.
    #[instrument(skip(self, text))]
    pub async fn record_agent_callback(&self, session_id: &SessionId, from_agent_id: &AgentId, text: &str) -> Result<()> {
        let event = ChatEvent::new(
            session_id.clone(),
            conduit_events::ChatEventType::AgentCallback,
            serde_json::json!({ "text": text, "fromAgentId": from_agent_id.as_str() }),
        );
        let event = self.event_store.append(session_id, event).await?;
        if let Some(state) = self.sessions.get(session_id) {
            let mut guard = state.write().await;
            guard
                .chat_messages
                .push(conduit_history::ChatCompletionMessage::user(format!(
                    "[Callback from {}]: {text}",
                    from_agent_id.as_str()
                )));
        }
        self.connections.broadcast_to_session(
            session_id,
            EventFrame::new("agent_callback", serde_json::to_value(&event)?),
        );
        Ok(())
    }

    // -- connection lifecycle (spec §4.6) -----------------------------

    /// Picks the requested session if alive, else the most-recent
    /// non-deleted session, else a fresh one; ensures its state; subscribes
    /// `conn_id` to it.
    #[instrument(skip(self))]
    pub async fn attach_connection(
        &self,
        conn_id: &ConnId,
        requested_session_id: Option<&SessionId>,
        force: bool,
    ) -> Result<Arc<RwLock<LogicalSessionState>>> {
        let target = self.resolve_attach_target(requested_session_id)?;
        let state = self.ensure_session_state(&target, None, force).await?;
        self.connections.subscribe(conn_id, &target);
        Ok(state)
    }

    fn resolve_attach_target(&self, requested: Option<&SessionId>) -> Result<SessionId> {
        if let Some(requested) = requested {
            if let Some(summary) = self.session_index.get(requested.as_str())? {
                if !summary.deleted {
                    return Ok(requested.clone());
                }
            }
        }
        if let Some(summary) = self.session_index.list(false, 1)?.into_iter().next() {
            return Ok(SessionId::from(summary.session_id));
        }
        Ok(SessionId::new())
    }

    /// Create-or-fetch a session's cached state. Touches the LRU, provisions
    /// `core.workingDir` if missing, and loads/folds history on first
    /// access. `force` bypasses the cache and reloads everything.
    #[instrument(skip(self, hint))]
    pub async fn ensure_session_state(
        &self,
        session_id: &SessionId,
        hint: Option<&AgentId>,
        force: bool,
    ) -> Result<Arc<RwLock<LogicalSessionState>>> {
        if !force {
            if let Some(state) = self.sessions.get(session_id) {
                self.touch_lru(session_id);
                return Ok(state.clone());
            }
        }

        let summary = match self.session_index.get(session_id.as_str())? {
            Some(summary) => summary,
            None => {
                let summary = self.session_index.create(session_id.as_str(), hint.map(AgentId::as_str), None)?;
                let payload = SessionLifecyclePayload {
                    session_id: session_id.as_str().to_string(),
                    summary: serde_json::to_value(&summary)?,
                };
                self.connections.broadcast_to_all(EventFrame::new(SESSION_CREATED, payload));
                summary
            }
        };
        let summary = self.provision_working_dir(session_id, summary)?;

        let request = HistoryRequest { session_id: session_id.clone(), attributes: summary.attributes.clone() };
        let events = self.history.get_history(&request).await?;
        let chat_messages = project_to_chat_messages(&events, false);

        let mut state = LogicalSessionState::new(summary);
        state.chat_messages = chat_messages;
        let state = Arc::new(RwLock::new(state));

        self.sessions.insert(session_id.clone(), state.clone());
        self.touch_lru(session_id);
        self.evict_if_needed();

        Ok(state)
    }

    fn provision_working_dir(&self, session_id: &SessionId, summary: SessionSummary) -> Result<SessionSummary> {
        if conduit_core::attributes::working_dir(&summary.attributes).is_some() {
            return Ok(summary);
        }
        let Some(resolver) = &self.working_dir_resolver else {
            return Ok(summary);
        };
        let Some(path) = resolver.resolve(session_id, &summary) else {
            return Ok(summary);
        };
        std::fs::create_dir_all(&path)?;
        let patch = serde_json::json!({ "core": { "workingDir": path.to_string_lossy() } });
        self.session_index.update_attributes(session_id.as_str(), &patch)
    }

    pub fn subscribe_connection(&self, conn_id: &ConnId, session_id: &SessionId) {
        self.connections.subscribe(conn_id, session_id);
    }

    pub fn unsubscribe_connection(&self, conn_id: &ConnId, session_id: &SessionId) {
        self.connections.unsubscribe(conn_id, session_id);
    }

    pub fn detach_connection_all(&self, conn_id: &ConnId) {
        self.connections.unsubscribe_all(conn_id);
    }

    // -- session mutation (spec §4.6) ---------------------------------

    #[instrument(skip(self, snippet))]
    pub async fn record_session_activity(&self, session_id: &SessionId, snippet: Option<&str>) -> Result<SessionSummary> {
        self.session_index.mark_activity(session_id.as_str(), snippet)?;
        self.touch_lru(session_id);
        self.refresh_and_broadcast(session_id, SESSION_UPDATED).await
    }

    #[instrument(skip(self))]
    pub async fn pin_session(&self, session_id: &SessionId, pinned: bool) -> Result<SessionSummary> {
        self.session_index.pin(session_id.as_str(), pinned)?;
        self.refresh_and_broadcast(session_id, SESSION_UPDATED).await
    }

    #[instrument(skip(self, patch))]
    pub async fn update_session_attributes(
        &self,
        session_id: &SessionId,
        patch: &serde_json::Value,
    ) -> Result<SessionSummary> {
        self.session_index.update_attributes(session_id.as_str(), patch)?;
        self.refresh_and_broadcast(session_id, SESSION_UPDATED).await
    }

    #[instrument(skip(self))]
    pub async fn touch_session(&self, session_id: &SessionId) -> Result<SessionSummary> {
        self.session_index.touch(session_id.as_str())?;
        self.touch_lru(session_id);
        self.refresh_and_broadcast(session_id, SESSION_UPDATED).await
    }

    /// Clears transient display state and the durable event log, leaving
    /// the session summary row (and thus its id) intact.
    #[instrument(skip(self))]
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<()> {
        self.event_store.clear_session(session_id).await?;
        self.session_index.clear(session_id.as_str())?;
        if let Some(state) = self.sessions.get(session_id) {
            state.write().await.chat_messages.clear();
        }
        self.connections.broadcast_to_all(EventFrame::new(
            SESSION_CLEARED,
            SessionClearedPayload { session_id: session_id.as_str().to_string() },
        ));
        Ok(())
    }

    /// Aborts any active run, drops the queue, tombstones the session, and
    /// drains its interaction slots and CLI rendezvous records.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        if let Some(state) = self.sessions.get(session_id) {
            let mut guard = state.write().await;
            if let Some(run) = &guard.active_chat_run {
                run.cancel_token.cancel();
            }
            guard.active_chat_run = None;
            guard.queue.clear();
            guard.deleted = true;
        }

        self.event_store.delete_session(session_id).await?;
        self.session_index.mark_deleted(session_id.as_str())?;
        self.interactions.cancel_session(session_id);
        self.rendezvous.clear_session(session_id);

        self.sessions.remove(session_id);
        self.lru.lock().retain(|id| id != session_id);

        self.connections.broadcast_to_all(EventFrame::new(
            SESSION_DELETED,
            SessionDeletedPayload { session_id: session_id.as_str().to_string() },
        ));
        Ok(())
    }

    async fn refresh_and_broadcast(&self, session_id: &SessionId, event: &str) -> Result<SessionSummary> {
        let summary = self
            .session_index
            .get(session_id.as_str())?
            .ok_or_else(|| ConduitError::InvalidSessionId { session_id: session_id.as_str().to_string() })?;

        if let Some(state) = self.sessions.get(session_id) {
            state.write().await.summary = summary.clone();
        }

        let payload = SessionLifecyclePayload {
            session_id: session_id.as_str().to_string(),
            summary: serde_json::to_value(&summary)?,
        };
        self.connections.broadcast_to_all(EventFrame::new(event, payload));
        Ok(summary)
    }

    // -- per-session input queue (spec §4.6/§4.7) ---------------------

    #[instrument(skip(self, message))]
    pub async fn queue_message(&self, message: QueuedMessage) -> Result<usize> {
        let state = self.ensure_session_state(&message.session_id, None, false).await?;
        let position = {
            let mut guard = state.write().await;
            guard.queue.push_back(message.clone());
            guard.queue.len()
        };
        self.connections.broadcast_to_session(
            &message.session_id,
            EventFrame::new(
                MESSAGE_QUEUED,
                MessageQueuedPayload { session_id: message.session_id.as_str().to_string(), position },
            ),
        );
        Ok(position)
    }

    /// Pops and runs the head of the queue iff no run is currently active.
    /// A no-op if the queue is empty or a run is already in flight.
    #[instrument(skip(self))]
    pub async fn process_next_queued_message(&self, session_id: &SessionId) {
        let Some(state) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return;
        };

        let next = {
            let mut guard = state.write().await;
            if guard.active_chat_run.is_some() {
                return;
            }
            guard.queue.pop_front()
        };
        let Some(message) = next else {
            return;
        };

        self.connections.broadcast_to_session(
            session_id,
            EventFrame::new(MESSAGE_DEQUEUED, MessageDequeuedPayload { session_id: session_id.as_str().to_string() }),
        );

        let Some(runner) = self.turn_runner.lock().clone() else {
            tracing::warn!(%session_id, "queued message dropped: no turn runner registered");
            return;
        };
        let request = TurnRequest {
            session_id: session_id.clone(),
            text: message.text,
            source: message.source,
            from_agent_id: message.from_agent_id,
            from_session_id: message.from_session_id,
            origin_conn_id: message.origin_conn_id,
        };
        tokio::spawn(async move { runner.run_turn(request).await });
    }

    // -- run cancellation (spec §4.7) ----------------------------------

    /// Flags the active run's `outputCancelled` and fires its cancel token
    /// (spec §6 `output_cancel`, §4.7 cancellation semantics: an explicit
    /// user cancel marks in-flight tool calls `interrupted`, an implicit
    /// one does not). Returns `false` if there is no active run to cancel.
    #[instrument(skip(self))]
    pub async fn cancel_output(&self, session_id: &SessionId) -> Result<bool> {
        let Some(state) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return Ok(false);
        };
        let mut guard = state.write().await;
        let Some(run) = &mut guard.active_chat_run else {
            return Ok(false);
        };
        run.output_cancelled = true;
        run.cancel_token.cancel();
        Ok(true)
    }

    // -- interaction & CLI rendezvous (spec §4.6/§4.9) ----------------

    pub fn record_cli_tool_call(&self, session_id: &SessionId, call_id: &CallId, tool_name: &str, args: serde_json::Value) {
        self.rendezvous.record(session_id.clone(), call_id.clone(), tool_name.to_string(), args);
    }

    pub fn match_cli_tool_call(&self, session_id: &SessionId, call_id: &CallId) -> Option<CliToolCallRecord> {
        self.rendezvous.find(CliToolCallQuery { session_id, call_id })
    }

    pub fn set_interaction_state(&self, conn_id: &ConnId, supported: bool, enabled: bool) {
        self.connections.set_interaction_capability(conn_id, supported, enabled);
    }

    pub fn get_interaction_availability(&self, session_id: &SessionId) -> InteractionSummary {
        self.connections.interaction_summary(session_id)
    }

    // -- LRU eviction (spec §4.6) --------------------------------------

    fn touch_lru(&self, session_id: &SessionId) {
        let mut lru = self.lru.lock();
        lru.retain(|id| id != session_id);
        lru.push_back(session_id.clone());
    }

    /// Evicts the least-recently-used cached state that has neither an
    /// active run nor connections attached, repeating until under the cap.
    /// Skipped candidates (busy or connected) are returned to the back of
    /// the LRU so the scan always makes forward progress.
    fn evict_if_needed(&self) {
        let max = self.config.hub.max_cached_sessions;
        if self.sessions.len() <= max {
            return;
        }
        let attempts = self.lru.lock().len();
        for _ in 0..attempts {
            if self.sessions.len() <= max {
                break;
            }
            let candidate = {
                let mut lru = self.lru.lock();
                match lru.pop_front() {
                    Some(id) => id,
                    None => break,
                }
            };
            let evictable = match self.sessions.get(&candidate) {
                Some(state) => match state.try_read() {
                    Ok(guard) => !guard.is_busy() && self.connections.subscriber_count(&candidate) == 0,
                    Err(_) => false,
                },
                None => false,
            };
            if evictable {
                self.sessions.remove(&candidate);
            } else if self.sessions.contains_key(&candidate) {
                self.lru.lock().push_back(candidate);
            }
        }
    }
}
