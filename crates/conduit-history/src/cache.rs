use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;

use conduit_core::{ConduitError, Result};
use conduit_events::ChatEvent;

/// `{path → (mtime, events)}` cache shared by the external-file history
/// providers (spec §4.2 cache contract). Reused iff `mtime` matches a
/// fresh `stat`; otherwise the caller re-reads and re-translates.
#[derive(Default)]
pub struct FileCache {
    entries: DashMap<PathBuf, (SystemTime, Vec<ChatEvent>)>,
}

impl FileCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Returns cached events if the file's mtime is unchanged, `Ok(None)`
    /// if the file does not exist (ENOENT — caller should fall back to the
    /// event store), or re-translates and refreshes the cache otherwise.
    pub fn get_or_translate(
        &self,
        path: &Path,
        translate: impl FnOnce(&str) -> Vec<ChatEvent>,
    ) -> Result<Option<Vec<ChatEvent>>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::StorageError(e.to_string())),
        };
        let mtime = metadata
            .modified()
            .map_err(|e| ConduitError::StorageError(e.to_string()))?;

        if let Some(cached) = self.entries.get(path) {
            if cached.0 == mtime {
                return Ok(Some(cached.1.clone()));
            }
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::StorageError(e.to_string())),
        };
        let events = translate(&contents);
        self.entries.insert(path.to_path_buf(), (mtime, events.clone()));
        Ok(Some(events))
    }
}
