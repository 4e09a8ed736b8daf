//! Presence notifications.
//!
//! Online/offline is never stored: a user is online while the session registry
//! holds at least one of their sessions. `register`/`unregister` report the
//! 0 -> 1 and 1 -> 0 edges, and only those edges produce a `user_status` event,
//! sent to every user who shares a room with the affected user.

use crate::chat::spawn_bounded;
use crate::chat::store::StoreError;
use crate::db::models::UserId;
use crate::state::AppState;
use crate::ws::broadcast::send_to_users;
use crate::ws::events::{now_millis, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Push a `user_status` event to everyone sharing a room with `user_id`.
/// Returns the number of sessions reached.
///
/// Nothing is sent when the registry no longer agrees with `status`: a
/// reconnect or disconnect that lands while the room lookup is in flight
/// produces its own edge, and the stale one must not overwrite it.
pub async fn notify_status_change(
    state: &AppState,
    user_id: UserId,
    username: &str,
    status: PresenceStatus,
) -> Result<usize, StoreError> {
    let interested = state.store.users_sharing_room_with(user_id).await?;

    if PresenceStatus::from_online(state.registry.is_user_online(user_id)) != status {
        tracing::debug!(user_id, status = status.as_str(), "Stale presence edge dropped");
        return Ok(0);
    }

    let event = ServerEvent::UserStatus {
        user_id,
        username: username.to_string(),
        status: status.as_str(),
        timestamp: now_millis(),
    };

    Ok(send_to_users(&state.registry, &interested, &event))
}

/// Fire-and-forget `notify_status_change`, bounded by the configured timeout.
/// Never blocks connection accept or teardown.
pub fn spawn_status_change(
    state: &AppState,
    user_id: UserId,
    username: &str,
    status: PresenceStatus,
) {
    tracing::info!(user_id, username = %username, status = status.as_str(), "Presence changed");

    let state = state.clone();
    let username = username.to_string();
    let limit = state.settings.notify_timeout;
    spawn_bounded(limit, "presence", async move {
        notify_status_change(&state, user_id, &username, status).await
    });
}
