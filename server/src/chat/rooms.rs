//! REST glue for rooms and the user directory.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::presence::PresenceStatus;
use crate::chat::store::StoreError;
use crate::db::models::{DirectRoom, UserId};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DirectRoomRequest {
    pub recipient_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct DirectoryEntry {
    pub id: UserId,
    pub username: String,
    pub created_at: i64,
    pub status: &'static str,
}

/// POST /api/rooms/direct
/// Return the direct room shared with `recipient_id`, creating it on first use.
pub async fn create_direct_room(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<DirectRoomRequest>,
) -> Result<Json<DirectRoom>, StatusCode> {
    let recipient = req.recipient_id.ok_or(StatusCode::BAD_REQUEST)?;
    if recipient == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state
        .store
        .get_or_create_direct_room(claims.sub, recipient)
        .await
    {
        Ok(room) => {
            if room.is_new {
                tracing::info!(
                    room = %room.room_id,
                    user_id = claims.sub,
                    recipient_id = recipient,
                    "Direct room created"
                );
            }
            Ok(Json(room))
        }
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create direct room");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/users
/// Every user except the caller, with live presence from the session registry.
pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<DirectoryEntry>>, StatusCode> {
    let users = state.store.list_users().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list users");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let entries = users
        .into_iter()
        .filter(|u| u.id != claims.sub)
        .map(|u| DirectoryEntry {
            status: PresenceStatus::from_online(state.registry.is_user_online(u.id)).as_str(),
            id: u.id,
            username: u.username,
            created_at: u.created_at,
        })
        .collect();

    Ok(Json(entries))
}
