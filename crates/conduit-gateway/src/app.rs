//! Central shared state, assembled once at startup (spec §1's
//! consumed-capability wiring). Grounded on `skynet-gateway::app::AppState`
//! and its `build_router`.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use conduit_core::ConduitConfig;
use conduit_events::EventStore;
use conduit_history::{ClaudeSessionHistoryProvider, EventStoreHistoryProvider, HistoryProviderRegistry, PiSessionHistoryProvider};
use conduit_hub::{RootedWorkingDirResolver, SessionHub, WorkingDirResolver};
use conduit_runtime::RunController;
use conduit_sessions::SessionIndex;

use crate::connection_registry::ConnectionRegistry;
use crate::demo::{EchoLlmStream, NoToolsHost};
use crate::panel::PanelEventRegistry;

pub struct AppState {
    pub config: Arc<ConduitConfig>,
    pub node_id: String,
    pub connections: Arc<ConnectionRegistry>,
    pub hub: Arc<SessionHub>,
    pub run_controller: Arc<RunController>,
    pub panels: PanelEventRegistry,
}

impl AppState {
    pub fn new(config: ConduitConfig, node_id: impl Into<String>) -> conduit_core::Result<Arc<Self>> {
        let config = Arc::new(config);

        let session_index = Arc::new(SessionIndex::open(&config.database.path)?);
        let event_store_path = format!("{}.events", config.database.path);
        let event_store = Arc::new(EventStore::open(&event_store_path)?);

        let mut history_registry = HistoryProviderRegistry::default();
        history_registry = history_registry
            .register(Box::new(ClaudeSessionHistoryProvider::new(config.history.claude_base_dir.clone())))
            .register(Box::new(PiSessionHistoryProvider::new(config.history.pi_base_dir.clone())))
            .register(Box::new(EventStoreHistoryProvider::new(event_store.clone())));
        let history = Arc::new(history_registry);

        let connections = Arc::new(ConnectionRegistry::new());

        let working_dir_root = std::path::PathBuf::from(&config.database.path)
            .parent()
            .map(|p| p.join("sessions"))
            .unwrap_or_else(|| std::path::PathBuf::from("sessions"));
        let working_dir_resolver: Arc<dyn WorkingDirResolver> =
            Arc::new(RootedWorkingDirResolver::new(working_dir_root));

        let hub = Arc::new(SessionHub::new(
            config.clone(),
            session_index.clone(),
            event_store.clone(),
            history.clone(),
            connections.clone(),
            Some(working_dir_resolver),
        ));

        let run_controller = Arc::new(RunController::new(
            hub.clone(),
            event_store.clone(),
            history.clone(),
            Arc::new(EchoLlmStream),
            Arc::new(NoToolsHost),
            config.clone(),
        ));
        hub.set_turn_runner(run_controller.clone());

        Ok(Arc::new(Self {
            config,
            node_id: node_id.into(),
            connections,
            hub,
            run_controller,
            panels: PanelEventRegistry::new(),
        }))
    }

    /// A fully-wired instance backed by a scratch temp directory, for
    /// dispatch-level tests that need the real hub/run-controller plumbing
    /// rather than mocks.
    #[cfg(test)]
    pub fn test_instance(dir: &std::path::Path) -> Arc<Self> {
        let mut config = ConduitConfig::default();
        config.database.path = dir.join("conduit.db").to_string_lossy().to_string();
        config.history.claude_base_dir = dir.join("claude").to_string_lossy().to_string();
        config.history.pi_base_dir = dir.join("pi").to_string_lossy().to_string();
        Self::new(config, "test-node").expect("test AppState construction")
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
