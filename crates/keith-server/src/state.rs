use std::sync::Arc;

use keith_core::LocalRoom;
use keith_tasks::TaskBridge;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event bus backing the SSE stream
    pub bus: Arc<keith_bus::EventBus>,
    pub tasks: TaskBridge,
    /// Room the websocket endpoint joins callers into
    pub room: LocalRoom,
}
