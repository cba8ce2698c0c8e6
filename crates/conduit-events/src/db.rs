use rusqlite::Connection;

use conduit_core::Result;

/// Initialise the event log table and its lookup index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
/// `rowid` (SQLite's implicit autoincrement) is the append-order marker:
/// writes to a session are always serialized by the store's per-session
/// lock, so rowid order is observation order within that session.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chat_events (
            rowid         INTEGER PRIMARY KEY AUTOINCREMENT,
            id            TEXT NOT NULL UNIQUE,
            session_id    TEXT NOT NULL,
            turn_id       TEXT,
            response_id   TEXT,
            event_type    TEXT NOT NULL,
            payload       TEXT NOT NULL,
            timestamp     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_events_session
            ON chat_events(session_id, rowid);",
    )
    .map_err(|e| conduit_core::ConduitError::StorageError(e.to_string()))?;
    Ok(())
}
