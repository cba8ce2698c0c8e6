use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use rusqlite::Connection;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::instrument;

use conduit_core::{ConduitError, Result, SessionId};

use crate::db::init_db;
use crate::types::{ChatEvent, ChatEventType};

const SUBSCRIBER_CAPACITY: usize = 1024;

/// The append-only per-session event log (spec §4.1, component C1).
///
/// Durability is backed by SQLite; fan-out to live subscribers uses one
/// `tokio::sync::broadcast` channel per session. Writes to a single
/// session are serialized through a per-session async lock so that
/// `appendBatch` is atomic with respect to subscribers: no foreign append
/// can interleave while a batch is being written and published.
pub struct EventStore {
    conn: StdMutex<Connection>,
    subscribers: DashMap<SessionId, broadcast::Sender<ChatEvent>>,
    write_locks: DashMap<SessionId, Arc<AsyncMutex<()>>>,
}

impl EventStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self {
            conn: StdMutex::new(conn),
            subscribers: DashMap::new(),
            write_locks: DashMap::new(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self {
            conn: StdMutex::new(conn),
            subscribers: DashMap::new(),
            write_locks: DashMap::new(),
        })
    }

    async fn lock_session(&self, session_id: &SessionId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Durable append, event order preserved. Fails with `storage_error` only.
    #[instrument(skip(self, event), fields(session_id = %session_id))]
    pub async fn append(&self, session_id: &SessionId, event: ChatEvent) -> Result<ChatEvent> {
        let _guard = self.lock_session(session_id).await;
        self.insert_row(&event)?;
        self.publish(session_id, event.clone());
        Ok(event)
    }

    /// Atomic with respect to subscribers: all-or-nothing observation.
    #[instrument(skip(self, events), fields(session_id = %session_id, count = events.len()))]
    pub async fn append_batch(
        &self,
        session_id: &SessionId,
        events: Vec<ChatEvent>,
    ) -> Result<Vec<ChatEvent>> {
        let _guard = self.lock_session(session_id).await;
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn
                .transaction()
                .map_err(|e| ConduitError::StorageError(e.to_string()))?;
            for event in &events {
                insert_row_tx(&tx, event)?;
            }
            tx.commit()
                .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        }
        for event in &events {
            self.publish(session_id, event.clone());
        }
        Ok(events)
    }

    /// Full ordered history for a session.
    pub fn get_events(&self, session_id: &SessionId) -> Result<Vec<ChatEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, turn_id, response_id, event_type, payload, timestamp
                 FROM chat_events WHERE session_id = ?1 ORDER BY rowid ASC",
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![session_id.as_str()], row_to_event)
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        collect_rows(rows)
    }

    /// Events strictly after `event_id`, in order.
    pub fn get_events_since(&self, session_id: &SessionId, event_id: &str) -> Result<Vec<ChatEvent>> {
        let conn = self.conn.lock().unwrap();
        let anchor: Option<i64> = conn
            .query_row(
                "SELECT rowid FROM chat_events WHERE id = ?1",
                rusqlite::params![event_id],
                |row| row.get(0),
            )
            .ok();
        let Some(anchor) = anchor else {
            // Unknown anchor: no ordering to anchor to, return nothing rather
            // than guessing at a full replay.
            return Ok(Vec::new());
        };
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, turn_id, response_id, event_type, payload, timestamp
                 FROM chat_events WHERE session_id = ?1 AND rowid > ?2 ORDER BY rowid ASC",
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![session_id.as_str(), anchor], row_to_event)
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        collect_rows(rows)
    }

    /// Live pushes for subsequent appends. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<ChatEvent> {
        self.subscribers
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .subscribe()
    }

    /// Purges events for a session; emits no past events afterward.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<()> {
        let _guard = self.lock_session(session_id).await;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chat_events WHERE session_id = ?1",
            rusqlite::params![session_id.as_str()],
        )
        .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Same as clear plus drops any subscriber state.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        self.clear_session(session_id).await?;
        self.subscribers.remove(session_id);
        self.write_locks.remove(session_id);
        Ok(())
    }

    fn insert_row(&self, event: &ChatEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_events (id, session_id, turn_id, response_id, event_type, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                event.id,
                event.session_id.as_str(),
                event.turn_id.as_ref().map(|t| t.as_str()),
                event.response_id.as_ref().map(|r| r.as_str()),
                event.event_type.as_str(),
                event.payload.to_string(),
                event.timestamp,
            ],
        )
        .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn publish(&self, session_id: &SessionId, event: ChatEvent) {
        if let Some(tx) = self.subscribers.get(session_id) {
            // No subscribers is not an error — broadcast::send fails only
            // when the channel has zero receivers.
            let _ = tx.send(event);
        }
    }
}

fn insert_row_tx(tx: &rusqlite::Transaction<'_>, event: &ChatEvent) -> Result<()> {
    tx.execute(
        "INSERT INTO chat_events (id, session_id, turn_id, response_id, event_type, payload, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            event.id,
            event.session_id.as_str(),
            event.turn_id.as_ref().map(|t| t.as_str()),
            event.response_id.as_ref().map(|r| r.as_str()),
            event.event_type.as_str(),
            event.payload.to_string(),
            event.timestamp,
        ],
    )
    .map_err(|e| ConduitError::StorageError(e.to_string()))?;
    Ok(())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatEvent> {
    let session_id: String = row.get(1)?;
    let turn_id: Option<String> = row.get(2)?;
    let response_id: Option<String> = row.get(3)?;
    let event_type: String = row.get(4)?;
    let payload: String = row.get(5)?;
    Ok(ChatEvent {
        id: row.get(0)?,
        session_id: SessionId::from(session_id),
        turn_id: turn_id.map(Into::into),
        response_id: response_id.map(Into::into),
        event_type: ChatEventType::from_str(&event_type).unwrap_or(ChatEventType::CustomMessage),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        timestamp: row.get(6)?,
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<ChatEvent>>,
) -> Result<Vec<ChatEvent>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| ConduitError::StorageError(e.to_string()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(session_id: &SessionId, ty: ChatEventType, text: &str) -> ChatEvent {
        ChatEvent::new(session_id.clone(), ty, json!({ "text": text }))
    }

    #[tokio::test]
    async fn append_and_get_events_preserves_order() {
        let store = EventStore::in_memory().unwrap();
        let session_id = SessionId::new();
        store
            .append(&session_id, event(&session_id, ChatEventType::TurnStart, "t1"))
            .await
            .unwrap();
        store
            .append(&session_id, event(&session_id, ChatEventType::UserMessage, "hi"))
            .await
            .unwrap();
        store
            .append(&session_id, event(&session_id, ChatEventType::TurnEnd, "t1"))
            .await
            .unwrap();

        let events = store.get_events(&session_id).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, ChatEventType::TurnStart);
        assert_eq!(events[1].event_type, ChatEventType::UserMessage);
        assert_eq!(events[2].event_type, ChatEventType::TurnEnd);
    }

    #[tokio::test]
    async fn get_events_since_returns_strictly_after_anchor() {
        let store = EventStore::in_memory().unwrap();
        let session_id = SessionId::new();
        let first = store
            .append(&session_id, event(&session_id, ChatEventType::TurnStart, "t1"))
            .await
            .unwrap();
        store
            .append(&session_id, event(&session_id, ChatEventType::UserMessage, "hi"))
            .await
            .unwrap();

        let since = store.get_events_since(&session_id, &first.id).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].event_type, ChatEventType::UserMessage);
    }

    #[tokio::test]
    async fn clear_session_empties_log_and_future_gets() {
        let store = EventStore::in_memory().unwrap();
        let session_id = SessionId::new();
        store
            .append(&session_id, event(&session_id, ChatEventType::TurnStart, "t1"))
            .await
            .unwrap();
        store.clear_session(&session_id).await.unwrap();
        assert!(store.get_events(&session_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_batch_is_observed_atomically_by_subscribers() {
        let store = EventStore::in_memory().unwrap();
        let session_id = SessionId::new();
        let mut rx = store.subscribe(&session_id);

        let batch = vec![
            event(&session_id, ChatEventType::TurnStart, "t1"),
            event(&session_id, ChatEventType::UserMessage, "hi"),
            event(&session_id, ChatEventType::TurnEnd, "t1"),
        ];
        store.append_batch(&session_id, batch).await.unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        let c = rx.recv().await.unwrap();
        assert_eq!(a.event_type, ChatEventType::TurnStart);
        assert_eq!(b.event_type, ChatEventType::UserMessage);
        assert_eq!(c.event_type, ChatEventType::TurnEnd);
    }

    #[tokio::test]
    async fn delete_session_drops_subscriber_state() {
        let store = EventStore::in_memory().unwrap();
        let session_id = SessionId::new();
        let _rx = store.subscribe(&session_id);
        store
            .append(&session_id, event(&session_id, ChatEventType::TurnStart, "t1"))
            .await
            .unwrap();
        store.delete_session(&session_id).await.unwrap();
        assert!(store.get_events(&session_id).unwrap().is_empty());
        assert!(!store.subscribers.contains_key(&session_id));
    }
}
