//! Panel event routing (spec §4.8): `panel_event` frames are routed to a
//! plugin's `PanelEventHandler` registered for `payload.panelType`; if
//! none is registered, default behavior is to rebroadcast to the event's
//! session scope. Grounded on `skynet-hooks::engine::HookEngine` — a
//! priority-ordered, name-keyed registry dispatching by a string
//! discriminant — generalized from hook events to panel types and from a
//! blocking before/after pair to a single first-match dispatch (panels
//! have no "block the event" concept, spec §1 scopes panel *inventory*
//! presentation out; only the broadcast sink is core).

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use conduit_core::{ConnId, SessionId};

/// What a registered panel handler receives (spec §6 `panel_event{panelId,
/// panelType, sessionId?, payload}`).
#[derive(Debug, Clone)]
pub struct PanelEventContext {
    pub panel_id: String,
    pub panel_type: String,
    pub session_id: Option<SessionId>,
    pub payload: Value,
    pub origin_conn_id: ConnId,
}

/// Consumed by a plugin to intercept panel events of a given `panel_type`
/// (spec §1 "plugin/tool implementations" are out of scope; this is the
/// seam they attach through).
pub trait PanelEventHandler: Send + Sync {
    fn panel_type(&self) -> &str;
    fn handle(&self, ctx: &PanelEventContext);
}

/// Registry of panel handlers keyed by `panel_type`. Unlike `HookEngine`
/// there is no priority chain — at most one handler owns a given panel
/// type, matching §4.8's "routed to *a* plugin's handler".
#[derive(Default)]
pub struct PanelEventRegistry {
    handlers: RwLock<Vec<Arc<dyn PanelEventHandler>>>,
}

impl PanelEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn PanelEventHandler>) {
        let mut handlers = self.handlers.write();
        handlers.retain(|h| h.panel_type() != handler.panel_type());
        handlers.push(handler);
    }

    pub fn unregister(&self, panel_type: &str) {
        self.handlers.write().retain(|h| h.panel_type() != panel_type);
    }

    /// Dispatch to the handler registered for `ctx.panel_type`. Returns
    /// `true` if a handler ran; `false` means the caller should fall
    /// through to the default rebroadcast (spec §4.8, §8 "Unknown
    /// `panel_event.panelType` does not crash; falls through to default
    /// broadcast").
    pub fn dispatch(&self, ctx: &PanelEventContext) -> bool {
        let handler = self.handlers.read().iter().find(|h| h.panel_type() == ctx.panel_type).cloned();
        match handler {
            Some(handler) => {
                handler.handle(ctx);
                true
            }
            None => false,
        }
    }
}
