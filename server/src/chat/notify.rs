//! `new_message` hints for room participants who are online but not looking
//! at the room. The hint carries no message body.

use crate::chat::spawn_bounded;
use crate::chat::store::StoreError;
use crate::db::models::UserId;
use crate::state::AppState;
use crate::ws::broadcast::send_to_users;
use crate::ws::events::{MessageKind, ServerEvent};

/// Describes the message a hint announces.
#[derive(Debug, Clone)]
pub struct NewMessageHint {
    pub room: String,
    pub sender_id: UserId,
    pub sender_username: String,
    pub kind: MessageKind,
    pub timestamp: i64,
}

/// Send the hint to every other participant of the room who is online and
/// has no session joined to it. Returns the number of sessions reached.
pub async fn notify_new_message(state: &AppState, hint: NewMessageHint) -> Result<usize, StoreError> {
    let participants = state.store.room_participants(&hint.room).await?;

    let targets: Vec<UserId> = participants
        .into_iter()
        .filter(|&id| id != hint.sender_id)
        .filter(|&id| state.registry.is_user_online(id))
        .filter(|&id| !state.registry.is_user_in_room(id, &hint.room))
        .collect();

    if targets.is_empty() {
        return Ok(0);
    }

    let event = ServerEvent::NewMessage {
        room: hint.room,
        sender_id: hint.sender_id,
        sender_username: hint.sender_username,
        kind: hint.kind,
        timestamp: hint.timestamp,
    };

    Ok(send_to_users(&state.registry, &targets, &event))
}

/// Fire-and-forget `notify_new_message`, bounded by the configured timeout.
pub fn spawn_new_message_hint(state: &AppState, hint: NewMessageHint) {
    let state = state.clone();
    let limit = state.settings.notify_timeout;
    spawn_bounded(limit, "new_message", async move {
        notify_new_message(&state, hint).await
    });
}
