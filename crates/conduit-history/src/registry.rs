use conduit_core::Result;
use conduit_events::ChatEvent;

use crate::provider::{HistoryProvider, HistoryRequest};

/// Queries registered providers in order; the first whose `supports()`
/// returns true — and which actually finds data — handles the request.
///
/// Register the default `EventStoreHistoryProvider` last: its `supports()`
/// is unconditionally true, so it is both the catch-all and the ENOENT
/// fallback for the external-file providers ahead of it.
pub struct HistoryProviderRegistry {
    providers: Vec<Box<dyn HistoryProvider>>,
}

impl HistoryProviderRegistry {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    pub fn register(mut self, provider: Box<dyn HistoryProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub async fn get_history(&self, request: &HistoryRequest) -> Result<Vec<ChatEvent>> {
        for provider in &self.providers {
            if !provider.supports(request) {
                continue;
            }
            if let Some(events) = provider.get_history(request).await? {
                return Ok(events);
            }
        }
        Ok(Vec::new())
    }

    pub fn should_persist(&self, request: &HistoryRequest) -> bool {
        for provider in &self.providers {
            if provider.supports(request) {
                return provider.should_persist(request);
            }
        }
        true
    }
}

impl Default for HistoryProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
