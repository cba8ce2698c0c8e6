//! Interaction Registry (spec §4.9, component C9): promise-like slots that
//! let a tool call pause for user approval/input. Keyed by
//! `(sessionId, callId, interactionId)`, grounded on the cancellation/
//! timeout plumbing the run controller already uses for tool calls
//! (`tokio_util::sync::CancellationToken` + `tokio::time::timeout`).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use conduit_core::{CallId, InteractionId, SessionId};

/// The client's answer to a pending interaction (`interaction_response`
/// wire message, spec §6).
#[derive(Debug, Clone)]
pub struct InteractionResponse {
    pub action: String,
    pub input: Option<Value>,
    pub reason: Option<String>,
}

/// Why a `wait_for_response` call returned without a real answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionError {
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone)]
struct SlotKey {
    session_id: SessionId,
    call_id: CallId,
    interaction_id: InteractionId,
}

impl SlotKey {
    fn string_key(&self) -> String {
        format!("{}:{}:{}", self.session_id, self.call_id, self.interaction_id)
    }

    fn session_prefix(session_id: &SessionId) -> String {
        format!("{session_id}:")
    }
}

/// Registry of in-flight interaction slots. One process-wide instance,
/// shared via `Arc` between the run controller (creates/waits on slots)
/// and the gateway (resolves them on `interaction_response`).
#[derive(Default)]
pub struct InteractionRegistry {
    slots: Mutex<HashMap<String, oneshot::Sender<InteractionResponse>>>,
}

impl InteractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slot and block until it resolves, the cancel token
    /// fires, or `timeout` elapses — whichever comes first.
    pub async fn wait_for_response(
        &self,
        session_id: &SessionId,
        call_id: &CallId,
        interaction_id: &InteractionId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InteractionResponse, InteractionError> {
        let key = SlotKey { session_id: session_id.clone(), call_id: call_id.clone(), interaction_id: interaction_id.clone() };
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(key.string_key(), tx);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InteractionError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(InteractionError::Timeout),
            resolved = rx => resolved.map_err(|_| InteractionError::Cancelled),
        };

        self.slots.lock().remove(&key.string_key());
        result
    }

    /// Complete a pending slot. Returns `false` if no such slot exists
    /// (already resolved, timed out, or never created).
    pub fn resolve_response(
        &self,
        session_id: &SessionId,
        call_id: &CallId,
        interaction_id: &InteractionId,
        response: InteractionResponse,
    ) -> bool {
        let key = SlotKey { session_id: session_id.clone(), call_id: call_id.clone(), interaction_id: interaction_id.clone() };
        match self.slots.lock().remove(&key.string_key()) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Completes every slot under `<sessionId>:` with `Cancelled` — called
    /// when a session closes or is deleted (spec §4.9: "Session close must
    /// drain slots under `<sessionId>:` prefix").
    pub fn cancel_session(&self, session_id: &SessionId) {
        let prefix = SlotKey::session_prefix(session_id);
        let mut slots = self.slots.lock();
        let keys: Vec<String> = slots.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in keys {
            if let Some(tx) = slots.remove(&key) {
                let _ = tx.send(InteractionResponse { action: "cancelled".to_string(), input: None, reason: None });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, CallId, InteractionId) {
        (SessionId::new(), CallId::new(), InteractionId::new())
    }

    #[tokio::test]
    async fn resolve_completes_waiter() {
        let registry = std::sync::Arc::new(InteractionRegistry::new());
        let (session_id, call_id, interaction_id) = ids();
        let cancel = CancellationToken::new();

        let waiter = {
            let registry = registry.clone();
            let (session_id, call_id, interaction_id) = (session_id.clone(), call_id.clone(), interaction_id.clone());
            let cancel = cancel.clone();
            tokio::spawn(async move {
                registry
                    .wait_for_response(&session_id, &call_id, &interaction_id, Duration::from_secs(5), &cancel)
                    .await
            })
        };

        tokio::task::yield_now().await;
        let resolved = registry.resolve_response(
            &session_id,
            &call_id,
            &interaction_id,
            InteractionResponse { action: "approve".to_string(), input: None, reason: None },
        );
        assert!(resolved);

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.action, "approve");
    }

    #[tokio::test]
    async fn cancel_token_resolves_to_cancelled() {
        let registry = InteractionRegistry::new();
        let (session_id, call_id, interaction_id) = ids();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = registry
            .wait_for_response(&session_id, &call_id, &interaction_id, Duration::from_secs(5), &cancel)
            .await;
        assert_eq!(result.unwrap_err(), InteractionError::Cancelled);
    }

    #[tokio::test]
    async fn timeout_resolves_to_timeout() {
        let registry = InteractionRegistry::new();
        let (session_id, call_id, interaction_id) = ids();
        let cancel = CancellationToken::new();

        let result = registry
            .wait_for_response(&session_id, &call_id, &interaction_id, Duration::from_millis(10), &cancel)
            .await;
        assert_eq!(result.unwrap_err(), InteractionError::Timeout);
    }

    #[tokio::test]
    async fn cancel_session_drains_only_its_own_prefix() {
        let registry = std::sync::Arc::new(InteractionRegistry::new());
        let (session_a, call_id, interaction_id) = ids();
        let session_b = SessionId::new();
        let cancel = CancellationToken::new();

        let waiter_a = {
            let registry = registry.clone();
            let (session_a, call_id, interaction_id, cancel) =
                (session_a.clone(), call_id.clone(), interaction_id.clone(), cancel.clone());
            tokio::spawn(async move {
                registry.wait_for_response(&session_a, &call_id, &interaction_id, Duration::from_secs(5), &cancel).await
            })
        };
        let waiter_b = {
            let registry = registry.clone();
            let (session_b, call_id, interaction_id, cancel) =
                (session_b.clone(), call_id.clone(), interaction_id.clone(), cancel.clone());
            tokio::spawn(async move {
                registry.wait_for_response(&session_b, &call_id, &interaction_id, Duration::from_secs(5), &cancel).await
            })
        };

        tokio::task::yield_now().await;
        registry.cancel_session(&session_a);

        assert!(waiter_a.await.unwrap().is_ok());
        drop(waiter_b);
    }
}
