//! Room fan-out: delivers one event to many live sessions.
//!
//! Delivery is best-effort per recipient. A failed push to one session is
//! logged and skipped; it never stops delivery to the others and is never
//! reported back to the caller. Each event is serialized once per call.

use axum::extract::ws::Message;

use super::events::ServerEvent;
use super::{ConnectionSender, SessionId, SessionRegistry};
use crate::db::models::UserId;

fn encode(event: &ServerEvent) -> Option<Message> {
    match event.to_message() {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound event");
            None
        }
    }
}

/// Send an event to every session joined to `room`, except `exclude`.
/// Returns how many sessions accepted it.
pub fn broadcast(
    registry: &SessionRegistry,
    room: &str,
    event: &ServerEvent,
    exclude: Option<&SessionId>,
) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };

    let mut delivered = 0;
    registry.for_each_in_room(room, exclude, |session_id, entry| {
        match entry.handle.send(msg.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => tracing::warn!(
                room = %room,
                session_id = %session_id,
                user_id = entry.user_id,
                "Broadcast to closed session skipped"
            ),
        }
    });
    delivered
}

/// Send an event to every live session of a user (all devices).
pub fn send_to_user(registry: &SessionRegistry, user_id: UserId, event: &ServerEvent) -> usize {
    send_to_users(registry, &[user_id], event)
}

/// `send_to_user` for each id in turn, encoding the event only once.
pub fn send_to_users(registry: &SessionRegistry, user_ids: &[UserId], event: &ServerEvent) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };

    let mut delivered = 0;
    for &user_id in user_ids {
        registry.for_each_of_user(user_id, |session_id, entry| {
            match entry.handle.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    user_id = user_id,
                    session_id = %session_id,
                    "Send to closed session skipped"
                ),
            }
        });
    }
    delivered
}

/// Private reply on a single session.
pub fn send_to_session(tx: &ConnectionSender, event: &ServerEvent) -> bool {
    let Some(msg) = encode(event) else {
        return false;
    };
    tx.send(msg).is_ok()
}
