//! Shared server state.

use std::sync::Arc;

use crate::queue::MessagePublisher;
use crate::registry::Registry;

/// State injected into every handler.
pub struct AppState {
    /// Source of truth for users, rooms, chats and live connections.
    pub registry: Arc<Registry>,
    /// Producer side of the durable queue.
    pub publisher: Arc<dyn MessagePublisher>,
}
