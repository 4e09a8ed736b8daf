//! Row types read from and written to the SQLite schema in migrations.rs,
//! plus the JSON shapes they are exposed as.

use serde::{Deserialize, Serialize};

/// Authenticated user identifier (`users.id`).
pub type UserId = i64;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub room: String,
    pub user_id: UserId,
    pub username: String,
    pub content: Option<String>,
    pub voice: Option<String>,
    pub has_seen: bool,
    pub reply_to: Option<ReplyPreview>,
    pub created_at: i64,
}

/// A message that has not been saved yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: String,
    pub user_id: UserId,
    pub username: String,
    pub content: Option<String>,
    pub voice: Option<String>,
    pub reply_to: Option<ReplyPreview>,
}

/// Inlined copy of the message being replied to.
/// Stored as JSON in `messages.reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl From<&MessageRow> for ReplyPreview {
    fn from(row: &MessageRow) -> Self {
        Self {
            id: row.id,
            username: row.username.clone(),
            text: row.content.clone(),
            voice: row.voice.clone(),
            timestamp: row.created_at,
        }
    }
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub created_at: i64,
}

/// An uploaded profile photo. The file lives at `<upload_dir>/<filename>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub id: i64,
    pub user_id: UserId,
    pub filename: String,
    pub url: String,
    pub created_at: i64,
}

/// A user together with their photos, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: UserInfo,
    pub photos: Vec<Photo>,
}

/// Stored login credentials.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub created_at: i64,
}

/// One direct room of a user, as listed by the `list` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub other_user_id: UserId,
    pub other_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_voice_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    /// Filled in from the session registry, never stored.
    pub other_user_status: String,
}

/// Result of `get_or_create_direct_room`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectRoom {
    pub room_id: String,
    pub is_new: bool,
}
