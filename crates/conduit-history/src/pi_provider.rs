use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use conduit_core::{attributes, ConduitError, Result};
use conduit_events::ChatEvent;

use crate::cache::FileCache;
use crate::provider::{HistoryProvider, HistoryRequest};
use crate::translate::pi;

/// Reads prior turns for sessions continuing a Pi CLI conversation (spec
/// §4.2/§6). Claims a session iff its attributes carry a
/// `providers.pi-cli.{sessionId,cwd}` handle.
///
/// Pi writes one file per run rather than appending to a stable path, so
/// the provider scans the session's directory and picks the
/// lexicographically-last `<timestamp>_<sessionId>.jsonl` match — file
/// names carry a sortable timestamp prefix, so that is the latest run.
pub struct PiSessionHistoryProvider {
    base_dir: PathBuf,
    cache: Arc<FileCache>,
}

impl PiSessionHistoryProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), cache: Arc::new(FileCache::new()) }
    }

    fn dir_for(&self, cwd: &str) -> PathBuf {
        let stripped = cwd.strip_prefix('/').unwrap_or(cwd);
        let encoded = stripped.replace(['/', '\\', ':'], "-");
        self.base_dir.join(format!("--{encoded}--"))
    }

    fn latest_file_for(&self, dir: &Path, provider_session_id: &str) -> Result<Option<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::StorageError(e.to_string())),
        };

        let suffix = format!("_{provider_session_id}.jsonl");
        let mut matches: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConduitError::StorageError(e.to_string()))?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(&suffix) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches.pop())
    }
}

#[async_trait]
impl HistoryProvider for PiSessionHistoryProvider {
    fn name(&self) -> &str {
        "pi_cli"
    }

    fn supports(&self, request: &HistoryRequest) -> bool {
        attributes::provider_handle(&request.attributes, "pi-cli").is_some()
    }

    async fn get_history(&self, request: &HistoryRequest) -> Result<Option<Vec<ChatEvent>>> {
        let Some(handle) = attributes::provider_handle(&request.attributes, "pi-cli") else {
            return Ok(None);
        };
        let dir = self.dir_for(&handle.cwd);
        let Some(path) = self.latest_file_for(&dir, &handle.session_id)? else {
            return Ok(None);
        };
        let session_id = request.session_id.clone();
        self.cache.get_or_translate(&path, move |contents| pi::translate(&session_id, contents))
    }

    fn should_persist(&self, _request: &HistoryRequest) -> bool {
        false
    }
}
