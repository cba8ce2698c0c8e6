use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use conduit_core::{attributes, Result};
use conduit_events::ChatEvent;

use crate::cache::FileCache;
use crate::provider::{HistoryProvider, HistoryRequest};
use crate::translate::claude;

/// Reads prior turns for sessions continuing a Claude CLI conversation
/// (spec §4.2/§6). Claims a session iff its attributes carry a
/// `providers.claude-cli.{sessionId,cwd}` handle.
pub struct ClaudeSessionHistoryProvider {
    base_dir: PathBuf,
    cache: Arc<FileCache>,
}

impl ClaudeSessionHistoryProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), cache: Arc::new(FileCache::new()) }
    }

    fn path_for(&self, cwd: &str, provider_session_id: &str) -> PathBuf {
        let encoded_cwd = cwd.replace(['/', '\\', ':'], "-");
        self.base_dir.join(encoded_cwd).join(format!("{provider_session_id}.jsonl"))
    }
}

#[async_trait]
impl HistoryProvider for ClaudeSessionHistoryProvider {
    fn name(&self) -> &str {
        "claude_cli"
    }

    fn supports(&self, request: &HistoryRequest) -> bool {
        attributes::provider_handle(&request.attributes, "claude-cli").is_some()
    }

    async fn get_history(&self, request: &HistoryRequest) -> Result<Option<Vec<ChatEvent>>> {
        let Some(handle) = attributes::provider_handle(&request.attributes, "claude-cli") else {
            return Ok(None);
        };
        let path = self.path_for(&handle.cwd, &handle.session_id);
        let session_id = request.session_id.clone();
        self.cache.get_or_translate(&path, move |contents| claude::translate(&session_id, contents))
    }

    fn should_persist(&self, _request: &HistoryRequest) -> bool {
        false
    }
}
