use rusqlite::Connection;

use conduit_core::{ConduitError, Result};

/// Initialise the session_summaries table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_summaries (
            session_id   TEXT PRIMARY KEY,
            agent_id     TEXT,
            name         TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            pinned_at    TEXT,
            deleted      INTEGER NOT NULL DEFAULT 0,
            last_snippet TEXT,
            attributes   TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_session_summaries_updated
            ON session_summaries(deleted, updated_at DESC);",
    )
    .map_err(|e| ConduitError::StorageError(e.to_string()))?;
    Ok(())
}
