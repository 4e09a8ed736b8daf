//! JSON frames exchanged over the chat WebSocket.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::db::models::{Profile, ReplyPreview, RoomSummary, UserId};

/// An inbound client frame. Which fields matter depends on `event`;
/// unknown fields are ignored and unknown events are logged by the router.
#[derive(Debug, Default, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// One message in a `history` snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub id: i64,
    pub event: &'static str,
    pub room: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_url: Option<String>,
    pub username: String,
    pub timestamp: i64,
    pub is_your_message: bool,
    pub has_seen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}

/// A chat message as broadcast to a room.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub id: i64,
    pub room: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_url: Option<String>,
    pub username: String,
    pub timestamp: i64,
    pub has_seen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}

/// Kind of content announced by a `new_message` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
}

/// Server -> client frames, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        message: String,
    },
    Joined {
        room: String,
        username: String,
        timestamp: i64,
    },
    Join {
        room: String,
        username: String,
        timestamp: i64,
    },
    Leave {
        room: String,
        username: String,
        timestamp: i64,
    },
    History {
        room: String,
        history: Vec<HistoryItem>,
        /// Other participant of a direct room, with photos
        #[serde(rename = "otherUser", skip_serializing_if = "Option::is_none")]
        other_user: Option<Profile>,
        timestamp: i64,
    },
    Chat(ChatPayload),
    Error {
        error: String,
    },
    SeenSuccessful {
        room: String,
        username: String,
        timestamp: i64,
    },
    SeenFailed {
        room: String,
        error: String,
        updated: usize,
        timestamp: i64,
    },
    MessagesSeen {
        room: String,
        seen_by: UserId,
        username: String,
        timestamp: i64,
        count: usize,
    },
    List {
        rooms: Vec<RoomSummary>,
    },
    NewMessage {
        room: String,
        sender_id: UserId,
        sender_username: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        timestamp: i64,
    },
    UserStatus {
        user_id: UserId,
        username: String,
        status: &'static str,
        timestamp: i64,
    },
}

impl ServerEvent {
    /// Serialize into a text WebSocket frame.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
