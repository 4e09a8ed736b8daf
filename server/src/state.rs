use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::store::ChatStore;
use crate::db::DbPool;
use crate::ws::{new_session_registry, SessionRegistry};

/// Default number of messages pushed in a `history` snapshot.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Default upper bound for background presence / new-message fan-out.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime knobs the connection loop reads on every event.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Public base URL used to build absolute voice URLs, e.g. `https://chat.example.com`
    pub base_url: Option<String>,
    pub history_limit: usize,
    pub notify_timeout: Duration,
    /// Root of the `/uploads` tree; profile photos are written here
    pub upload_dir: PathBuf,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            upload_dir: PathBuf::from("./uploads"),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Rooms, participants, messages and users
    pub store: ChatStore,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live sessions and room membership, one per process
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<ChatSettings>,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, settings: ChatSettings) -> Self {
        Self {
            store: ChatStore::new(db),
            jwt_secret,
            registry: new_session_registry(),
            settings: Arc::new(settings),
        }
    }
}
