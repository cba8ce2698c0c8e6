use std::sync::Arc;

use async_trait::async_trait;

use conduit_core::Result;
use conduit_events::{ChatEvent, EventStore};

use crate::provider::{HistoryProvider, HistoryRequest};

/// Default provider: pulls directly from the event store (spec §4.2).
/// Always `supports()` — register it last in the registry so it acts as
/// the catch-all for sessions with no external-CLI attributes.
pub struct EventStoreHistoryProvider {
    store: Arc<EventStore>,
}

impl EventStoreHistoryProvider {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistoryProvider for EventStoreHistoryProvider {
    fn name(&self) -> &str {
        "event_store"
    }

    fn supports(&self, _request: &HistoryRequest) -> bool {
        true
    }

    async fn get_history(&self, request: &HistoryRequest) -> Result<Option<Vec<ChatEvent>>> {
        Ok(Some(self.store.get_events(&request.session_id)?))
    }
}
