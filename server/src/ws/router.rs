//! Per-connection event router.
//!
//! Each WebSocket connection owns one `EventRouter`. It tracks whether the
//! connection is viewing a room (`RoomState`), applies inbound events to the
//! session registry, and drives fan-out and persistence. The registry lock is
//! only taken inside registry/fan-out calls, never across a store await.
//!
//! Dropping the router performs connection teardown exactly once: leave the
//! current room (with a `leave` broadcast), unregister the session, and emit
//! the offline presence edge when it was the user's last session.

use crate::chat::notify::{spawn_new_message_hint, NewMessageHint};
use crate::chat::presence::{spawn_status_change, PresenceStatus};
use crate::chat::voice::voice_url;
use crate::db::models::{MessageRow, NewMessage, Profile, ReplyPreview, UserId};
use crate::state::AppState;
use crate::ws::broadcast::{broadcast, send_to_session};
use crate::ws::events::{
    now_millis, ChatPayload, ClientFrame, HistoryItem, MessageKind, ServerEvent,
};
use crate::ws::{ConnectionSender, SessionId};

/// Client timestamps below this are taken to be seconds, not milliseconds.
pub const SECONDS_THRESHOLD: i64 = 1_000_000_000_000;

pub const EMPTY_MESSAGE_ERROR: &str = "message must have either text or voice";

pub const WELCOME_MESSAGE: &str = "Welcome to the chat server";

/// Normalize a client-supplied `seen` timestamp to Unix milliseconds.
pub fn normalize_seen_timestamp(ts: i64) -> i64 {
    if ts < SECONDS_THRESHOLD {
        ts.saturating_mul(1000)
    } else {
        ts
    }
}

/// Identity and transport handle of the connection a router serves.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub tx: ConnectionSender,
    /// Host header of the upgrade request, used for voice URLs
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RoomState {
    #[default]
    Unjoined,
    Joined(String),
}

pub struct EventRouter {
    state: AppState,
    ctx: SessionContext,
    room: RoomState,
    closed: bool,
}

impl EventRouter {
    /// Register the session and announce the online edge if this is the
    /// user's first live session.
    pub fn connect(state: AppState, ctx: SessionContext) -> Self {
        let first = state
            .registry
            .register(ctx.session_id, ctx.user_id, &ctx.username, ctx.tx.clone());

        if first {
            spawn_status_change(&state, ctx.user_id, &ctx.username, PresenceStatus::Online);
        }

        Self {
            state,
            ctx,
            room: RoomState::Unjoined,
            closed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.ctx.session_id
    }

    pub fn room_state(&self) -> &RoomState {
        &self.room
    }

    pub fn current_room(&self) -> Option<&str> {
        match &self.room {
            RoomState::Joined(room) => Some(room),
            RoomState::Unjoined => None,
        }
    }

    /// Greet the freshly registered session.
    pub fn send_welcome(&self) {
        self.reply(&ServerEvent::Connected {
            message: WELCOME_MESSAGE.to_string(),
        });
    }

    /// Decode one text frame and dispatch it. Malformed frames are logged and dropped.
    pub async fn handle_text(&mut self, raw: &str) {
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => self.dispatch(frame).await,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.ctx.session_id,
                    user_id = self.ctx.user_id,
                    error = %e,
                    "Failed to parse client frame"
                );
            }
        }
    }

    pub async fn dispatch(&mut self, frame: ClientFrame) {
        match frame.event.as_str() {
            "join" => self.join(frame.room.as_deref().unwrap_or_default()).await,
            "leave" => self.leave(),
            "chat" => {
                self.chat(frame.text, frame.voice, frame.reply_to, frame.reply_to_id)
                    .await
            }
            "seen" => self.seen(frame.timestamp, frame.room).await,
            "list" => self.list().await,
            other => {
                tracing::debug!(
                    session_id = %self.ctx.session_id,
                    event = %other,
                    "Unknown event ignored"
                );
            }
        }
    }

    fn reply(&self, event: &ServerEvent) {
        if !send_to_session(&self.ctx.tx, event) {
            tracing::debug!(session_id = %self.ctx.session_id, "Reply to closed session dropped");
        }
    }

    fn voice_url(&self, filename: &str) -> Option<String> {
        voice_url(
            self.state.settings.base_url.as_deref(),
            self.ctx.host.as_deref(),
            filename,
        )
    }

    /// Registry leave plus `leave` broadcast to the remaining members.
    fn leave_room(&self, room: &str) {
        self.state.registry.leave(room, &self.ctx.session_id);
        broadcast(
            &self.state.registry,
            room,
            &ServerEvent::Leave {
                room: room.to_string(),
                username: self.ctx.username.clone(),
                timestamp: now_millis(),
            },
            Some(&self.ctx.session_id),
        );
    }

    /// Switch this connection to `target`, leaving the current room first.
    /// An empty room id is ignored.
    pub async fn join(&mut self, target: &str) {
        if target.is_empty() {
            return;
        }

        if let RoomState::Joined(prev) = std::mem::take(&mut self.room) {
            self.leave_room(&prev);
        }

        let sid = self.ctx.session_id;
        self.state.registry.join(target, &sid);
        self.room = RoomState::Joined(target.to_string());

        tracing::debug!(session_id = %sid, user_id = self.ctx.user_id, room = %target, "Joined room");

        self.reply(&ServerEvent::Joined {
            room: target.to_string(),
            username: self.ctx.username.clone(),
            timestamp: now_millis(),
        });

        broadcast(
            &self.state.registry,
            target,
            &ServerEvent::Join {
                room: target.to_string(),
                username: self.ctx.username.clone(),
                timestamp: now_millis(),
            },
            Some(&sid),
        );

        self.send_history(target).await;
    }

    async fn send_history(&self, room: &str) {
        let store = &self.state.store;

        let messages = match store
            .recent_messages(room, self.state.settings.history_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "Failed to load history");
                return;
            }
        };

        let history = messages
            .into_iter()
            .map(|m| self.history_item(m))
            .collect();

        self.reply(&ServerEvent::History {
            room: room.to_string(),
            history,
            other_user: self.other_user(room).await,
            timestamp: now_millis(),
        });
    }

    fn history_item(&self, m: MessageRow) -> HistoryItem {
        let voice_url = m.voice.as_deref().and_then(|v| self.voice_url(v));
        HistoryItem {
            id: m.id,
            event: "chat",
            is_your_message: m.user_id == self.ctx.user_id,
            room: m.room,
            text: m.content,
            voice: m.voice,
            voice_url,
            username: m.username,
            timestamp: m.created_at,
            has_seen: m.has_seen,
            reply_to: m.reply_to,
        }
    }

    /// Profile of the other participant of a direct room, if any.
    async fn other_user(&self, room: &str) -> Option<Profile> {
        let store = &self.state.store;
        match store.other_user_in_room(room, self.ctx.user_id).await {
            Ok(Some(other)) => store.profile(other).await.ok().flatten(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(room = %room, error = %e, "Other participant lookup failed");
                None
            }
        }
    }

    /// Leave the current room. No-op when not joined.
    pub fn leave(&mut self) {
        if let RoomState::Joined(room) = std::mem::take(&mut self.room) {
            self.leave_room(&room);
            tracing::debug!(session_id = %self.ctx.session_id, room = %room, "Left room");
        }
    }

    /// Persist and broadcast a chat message to the current room.
    pub async fn chat(
        &mut self,
        text: Option<String>,
        voice: Option<String>,
        reply_to: Option<ReplyPreview>,
        reply_to_id: Option<i64>,
    ) {
        let RoomState::Joined(room) = &self.room else {
            return;
        };
        let room = room.clone();

        let text = text.filter(|t| !t.is_empty());
        let voice = voice.filter(|v| !v.is_empty());
        if text.is_none() && voice.is_none() {
            self.reply(&ServerEvent::Error {
                error: EMPTY_MESSAGE_ERROR.to_string(),
            });
            return;
        }

        let reply_to = match (reply_to, reply_to_id) {
            (Some(inline), _) => Some(inline),
            (None, Some(id)) if id != 0 => self.resolve_reply(&room, id).await,
            _ => None,
        };

        let saved = match self
            .state
            .store
            .save_message(NewMessage {
                room: room.clone(),
                user_id: self.ctx.user_id,
                username: self.ctx.username.clone(),
                content: text,
                voice,
                reply_to,
            })
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(
                    room = %room,
                    user_id = self.ctx.user_id,
                    error = %e,
                    "Failed to save message, dropping it"
                );
                return;
            }
        };

        let kind = if saved.voice.is_some() {
            MessageKind::Voice
        } else {
            MessageKind::Text
        };
        let voice_url = saved.voice.as_deref().and_then(|v| self.voice_url(v));
        let timestamp = saved.created_at;

        // The sender is included: this broadcast is its send confirmation.
        broadcast(
            &self.state.registry,
            &room,
            &ServerEvent::Chat(ChatPayload {
                id: saved.id,
                room: room.clone(),
                text: saved.content,
                voice: saved.voice,
                voice_url,
                username: saved.username,
                timestamp,
                has_seen: saved.has_seen,
                reply_to: saved.reply_to,
            }),
            None,
        );

        spawn_new_message_hint(
            &self.state,
            NewMessageHint {
                room,
                sender_id: self.ctx.user_id,
                sender_username: self.ctx.username.clone(),
                kind,
                timestamp,
            },
        );
    }

    async fn resolve_reply(&self, room: &str, id: i64) -> Option<ReplyPreview> {
        match self.state.store.message_by_id(id).await {
            Ok(Some(target)) if target.room == room => Some(ReplyPreview::from(&target)),
            Ok(_) => {
                tracing::debug!(room = %room, reply_to_id = id, "Reply target not in room");
                None
            }
            Err(e) => {
                tracing::warn!(reply_to_id = id, error = %e, "Failed to resolve reply target");
                None
            }
        }
    }

    /// Mark the other participants' messages up to `timestamp` as seen.
    /// Uses the current room, or `explicit_room` when not joined.
    pub async fn seen(&mut self, timestamp: Option<i64>, explicit_room: Option<String>) {
        let room = match (&self.room, explicit_room) {
            (RoomState::Joined(room), _) => room.clone(),
            (RoomState::Unjoined, Some(room)) if !room.is_empty() => room,
            _ => return,
        };

        let client_ts = match timestamp {
            Some(ts) if ts != 0 => ts,
            _ => return,
        };
        let before = normalize_seen_timestamp(client_ts);

        match self
            .state
            .store
            .mark_seen(&room, self.ctx.user_id, before)
            .await
        {
            Ok(count) => {
                self.reply(&ServerEvent::SeenSuccessful {
                    room: room.clone(),
                    username: self.ctx.username.clone(),
                    timestamp: client_ts,
                });

                broadcast(
                    &self.state.registry,
                    &room,
                    &ServerEvent::MessagesSeen {
                        room: room.clone(),
                        seen_by: self.ctx.user_id,
                        username: self.ctx.username.clone(),
                        timestamp: client_ts,
                        count,
                    },
                    None,
                );
            }
            Err(e) => {
                tracing::warn!(room = %room, user_id = self.ctx.user_id, error = %e, "Failed to mark messages seen");
                self.reply(&ServerEvent::SeenFailed {
                    room,
                    error: e.to_string(),
                    updated: 0,
                    timestamp: client_ts,
                });
            }
        }
    }

    /// Send the caller's rooms, annotated with live presence, to this session only.
    pub async fn list(&mut self) {
        let mut rooms = match self.state.store.user_rooms(self.ctx.user_id).await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!(user_id = self.ctx.user_id, error = %e, "Failed to list rooms");
                Vec::new()
            }
        };

        for room in rooms.iter_mut() {
            let online = self.state.registry.is_user_online(room.other_user_id);
            room.other_user_status = PresenceStatus::from_online(online).as_str().to_string();
            room.last_voice_url = room.last_voice.as_deref().and_then(|v| self.voice_url(v));
        }

        self.reply(&ServerEvent::List { rooms });
    }

    /// Tear down the connection: leave, unregister, announce offline edge.
    /// Runs at most once; `Drop` calls it too.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.leave();

        if self.state.registry.unregister(&self.ctx.session_id) {
            spawn_status_change(
                &self.state,
                self.ctx.user_id,
                &self.ctx.username,
                PresenceStatus::Offline,
            );
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.close();
    }
}
