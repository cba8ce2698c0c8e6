use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::instrument;

use conduit_core::{attributes, ConduitError, Result};

use crate::db::init_db;
use crate::types::SessionSummary;

/// Durable store of [`SessionSummary`] rows (spec §4.5, component C5).
///
/// A single SQLite connection behind a `Mutex` — sessions are cheap,
/// low-frequency writes; a connection pool would be overkill here.
pub struct SessionIndex {
    db: Mutex<Connection>,
}

impl SessionIndex {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| ConduitError::StorageError(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ConduitError::StorageError(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Create a new session summary row. Callers choose the id so the hub
    /// and the index agree on it before any event is appended.
    #[instrument(skip(self, agent_id), fields(session_id))]
    pub fn create(&self, session_id: &str, agent_id: Option<&str>, name: Option<&str>) -> Result<SessionSummary> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_summaries (session_id, agent_id, name, created_at, updated_at, attributes)
             VALUES (?1, ?2, ?3, ?4, ?4, '{}')",
            rusqlite::params![session_id, agent_id, name, now],
        )
        .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        row_by_id(&db, session_id)?.ok_or_else(|| ConduitError::Internal("insert did not persist row".into()))
    }

    #[instrument(skip(self), fields(session_id))]
    pub fn get(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let db = self.db.lock().unwrap();
        row_by_id(&db, session_id)
    }

    /// Most-recently-updated non-deleted sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, include_deleted: bool, limit: usize) -> Result<Vec<SessionSummary>> {
        let db = self.db.lock().unwrap();
        let sql = if include_deleted {
            "SELECT session_id, agent_id, name, created_at, updated_at, pinned_at, deleted, last_snippet, attributes
             FROM session_summaries ORDER BY updated_at DESC LIMIT ?1"
        } else {
            "SELECT session_id, agent_id, name, created_at, updated_at, pinned_at, deleted, last_snippet, attributes
             FROM session_summaries WHERE deleted = 0 ORDER BY updated_at DESC LIMIT ?1"
        };
        let mut stmt = db.prepare(sql).map_err(|e| ConduitError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], row_to_summary)
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| ConduitError::StorageError(e.to_string()))?);
        }
        Ok(out)
    }

    /// Bumps `updatedAt` and optionally records the last message snippet
    /// shown in a session list UI.
    #[instrument(skip(self, snippet), fields(session_id))]
    pub fn mark_activity(&self, session_id: &str, snippet: Option<&str>) -> Result<()> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = if let Some(snippet) = snippet {
            db.execute(
                "UPDATE session_summaries SET updated_at = ?1, last_snippet = ?2 WHERE session_id = ?3",
                rusqlite::params![now, snippet, session_id],
            )
        } else {
            db.execute(
                "UPDATE session_summaries SET updated_at = ?1 WHERE session_id = ?2",
                rusqlite::params![now, session_id],
            )
        }
        .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        require_row(changed, session_id)
    }

    /// Bumps `updatedAt` only — used to refresh LRU position without
    /// implying new conversation activity.
    #[instrument(skip(self), fields(session_id))]
    pub fn touch(&self, session_id: &str) -> Result<()> {
        self.mark_activity(session_id, None)
    }

    #[instrument(skip(self), fields(session_id, pinned))]
    pub fn pin(&self, session_id: &str, pinned: bool) -> Result<()> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        let pinned_at: Option<String> = if pinned { Some(now.clone()) } else { None };
        let changed = db
            .execute(
                "UPDATE session_summaries SET pinned_at = ?1, updated_at = ?2 WHERE session_id = ?3",
                rusqlite::params![pinned_at, now, session_id],
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        require_row(changed, session_id)
    }

    #[instrument(skip(self), fields(session_id))]
    pub fn rename(&self, session_id: &str, name: Option<&str>) -> Result<()> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db
            .execute(
                "UPDATE session_summaries SET name = ?1, updated_at = ?2 WHERE session_id = ?3",
                rusqlite::params![name, now, session_id],
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        require_row(changed, session_id)
    }

    /// Deep-merges `patch` into the stored attribute tree with `null` →
    /// delete semantics (spec §4.5), validating reserved keys first.
    #[instrument(skip(self, patch), fields(session_id))]
    pub fn update_attributes(&self, session_id: &str, patch: &serde_json::Value) -> Result<SessionSummary> {
        let db = self.db.lock().unwrap();
        let mut summary = row_by_id(&db, session_id)?
            .ok_or_else(|| ConduitError::InvalidSessionId { session_id: session_id.to_string() })?;

        attributes::deep_merge(&mut summary.attributes, patch);
        attributes::validate_reserved_keys(&summary.attributes)?;

        let now = conduit_core::types::now_rfc3339();
        db.execute(
            "UPDATE session_summaries SET attributes = ?1, updated_at = ?2 WHERE session_id = ?3",
            rusqlite::params![summary.attributes.to_string(), now, session_id],
        )
        .map_err(|e| ConduitError::StorageError(e.to_string()))?;

        summary.updated_at = now;
        Ok(summary)
    }

    /// Soft-deletes a session (tombstone) — the row survives for history
    /// but is excluded from `list()` unless `include_deleted` is set.
    #[instrument(skip(self), fields(session_id))]
    pub fn mark_deleted(&self, session_id: &str) -> Result<()> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db
            .execute(
                "UPDATE session_summaries SET deleted = 1, updated_at = ?1 WHERE session_id = ?2",
                rusqlite::params![now, session_id],
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        require_row(changed, session_id)
    }

    /// Clears transient display state (the last-message snippet) without
    /// touching the durable conversation log, which lives in the event
    /// store and is cleared separately by the hub.
    #[instrument(skip(self), fields(session_id))]
    pub fn clear(&self, session_id: &str) -> Result<()> {
        let now = conduit_core::types::now_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db
            .execute(
                "UPDATE session_summaries SET last_snippet = NULL, updated_at = ?1 WHERE session_id = ?2",
                rusqlite::params![now, session_id],
            )
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;
        require_row(changed, session_id)
    }
}

fn require_row(rows_changed: usize, session_id: &str) -> Result<()> {
    if rows_changed == 0 {
        return Err(ConduitError::InvalidSessionId { session_id: session_id.to_string() });
    }
    Ok(())
}

fn row_by_id(conn: &Connection, session_id: &str) -> Result<Option<SessionSummary>> {
    conn.query_row(
        "SELECT session_id, agent_id, name, created_at, updated_at, pinned_at, deleted, last_snippet, attributes
         FROM session_summaries WHERE session_id = ?1",
        rusqlite::params![session_id],
        row_to_summary,
    )
    .optional()
    .map_err(|e| ConduitError::StorageError(e.to_string()))
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    let attributes_raw: String = row.get(8)?;
    Ok(SessionSummary {
        session_id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        pinned_at: row.get(5)?,
        deleted: row.get::<_, i64>(6)? != 0,
        last_snippet: row.get(7)?,
        attributes: serde_json::from_str(&attributes_raw).unwrap_or(serde_json::Value::Object(Default::default())),
    })
}
