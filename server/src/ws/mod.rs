pub mod actor;
pub mod broadcast;
pub mod events;
pub mod handler;
pub mod registry;
pub mod router;

use std::sync::Arc;
use tokio::sync::mpsc;

pub use registry::SessionRegistry;

/// Identifier of one live WebSocket connection, generated at accept time.
pub type SessionId = uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's outbound queue.
/// A single writer task drains it, so any number of callers may push to it.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Create a new empty session registry, shared by every connection task.
pub fn new_session_registry() -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new())
}
