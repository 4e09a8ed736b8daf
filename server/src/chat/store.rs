//! SQLite-backed persistence for rooms, participants and messages.
//!
//! Every call runs on the blocking pool via `spawn_blocking`, so callers on the
//! connection loop never hold the session registry lock across database I/O.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::models::{
    DirectRoom, MessageRow, NewMessage, Photo, Profile, ReplyPreview, RoomSummary,
    UserCredentials, UserId, UserInfo,
};
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("failed to encode reply preview: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("username already exists")]
    UsernameTaken,
}

const MESSAGE_COLUMNS: &str =
    "id, room, user_id, username, content, voice, has_seen, reply_to, created_at";

/// Handle to the chat tables. Cheap to clone.
#[derive(Clone)]
pub struct ChatStore {
    db: DbPool,
}

impl ChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }

    /// Persist a message, assigning its id and creation timestamp.
    pub async fn save_message(&self, msg: NewMessage) -> Result<MessageRow, StoreError> {
        self.call(move |conn| {
            let reply_json = msg
                .reply_to
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let created_at = Utc::now().timestamp_millis();

            conn.execute(
                "INSERT INTO messages (room, user_id, username, content, voice, has_seen, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                rusqlite::params![
                    msg.room,
                    msg.user_id,
                    msg.username,
                    msg.content,
                    msg.voice,
                    reply_json,
                    created_at,
                ],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                room: msg.room,
                user_id: msg.user_id,
                username: msg.username,
                content: msg.content,
                voice: msg.voice,
                has_seen: false,
                reply_to: msg.reply_to,
                created_at,
            })
        })
        .await
    }

    /// The most recent `limit` messages of a room, oldest first.
    pub async fn recent_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let room = room.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut messages = stmt
                .query_map(rusqlite::params![room, limit as i64], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    pub async fn message_by_id(&self, id: i64) -> Result<Option<MessageRow>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    rusqlite::params![id],
                    message_from_row,
                )
                .optional()?)
        })
        .await
    }

    pub async fn room_participants(&self, room: &str) -> Result<Vec<UserId>, StoreError> {
        let room = room.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM room_participants WHERE room_id = ?1")?;
            let ids = stmt
                .query_map(rusqlite::params![room], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    /// Every other user that shares at least one room with `user_id`.
    pub async fn users_sharing_room_with(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p2.user_id
                 FROM room_participants p1
                 JOIN room_participants p2 ON p1.room_id = p2.room_id AND p2.user_id != ?1
                 WHERE p1.user_id = ?1",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![user_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    /// Mark other users' unseen messages at or before `before_ms` as seen.
    /// Returns the number of messages updated.
    pub async fn mark_seen(
        &self,
        room: &str,
        viewer: UserId,
        before_ms: i64,
    ) -> Result<usize, StoreError> {
        let room = room.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE messages SET has_seen = 1
                 WHERE room = ?1 AND user_id != ?2 AND created_at <= ?3 AND has_seen = 0",
                rusqlite::params![room, viewer, before_ms],
            )?)
        })
        .await
    }

    /// Direct rooms of a user with the other participant and last message preview,
    /// most recently active first. `other_user_status` is left empty for the caller.
    pub async fn user_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, u.id, u.username,
                        (SELECT content FROM messages m WHERE m.room = r.id ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
                        (SELECT voice FROM messages m WHERE m.room = r.id ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
                        (SELECT created_at FROM messages m WHERE m.room = r.id ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_at
                 FROM rooms r
                 JOIN room_participants me ON me.room_id = r.id AND me.user_id = ?1
                 JOIN room_participants other ON other.room_id = r.id AND other.user_id != ?1
                 JOIN users u ON u.id = other.user_id
                 WHERE r.type = 'direct'
                 ORDER BY CASE WHEN last_at IS NULL THEN 1 ELSE 0 END,
                          last_at DESC,
                          r.created_at DESC",
            )?;
            let rooms = stmt
                .query_map(rusqlite::params![user_id], |row| {
                    Ok(RoomSummary {
                        room_id: row.get(0)?,
                        other_user_id: row.get(1)?,
                        other_username: row.get(2)?,
                        last_message: row.get(3)?,
                        last_voice: row.get(4)?,
                        last_voice_url: None,
                        last_message_at: row.get(5)?,
                        other_user_status: String::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
        .await
    }

    pub async fn other_user_in_room(
        &self,
        room: &str,
        user_id: UserId,
    ) -> Result<Option<UserId>, StoreError> {
        let room = room.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id FROM room_participants WHERE room_id = ?1 AND user_id != ?2 LIMIT 1",
                    rusqlite::params![room, user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    pub async fn user_info(&self, user_id: UserId) -> Result<Option<UserInfo>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    rusqlite::params![user_id],
                    user_info_from_row,
                )
                .optional()?)
        })
        .await
    }

    /// A user and their photos, or `None` for an unknown id.
    pub async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, StoreError> {
        self.call(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    rusqlite::params![user_id],
                    user_info_from_row,
                )
                .optional()?;
            match user {
                Some(user) => Ok(Some(Profile {
                    photos: photos_of(conn, user.id)?,
                    user,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn user_photos(&self, user_id: UserId) -> Result<Vec<Photo>, StoreError> {
        self.call(move |conn| Ok(photos_of(conn, user_id)?)).await
    }

    pub async fn add_photo(
        &self,
        user_id: UserId,
        filename: &str,
        url: &str,
    ) -> Result<Photo, StoreError> {
        let filename = filename.to_string();
        let url = url.to_string();
        self.call(move |conn| {
            let created_at = Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO photos (user_id, filename, url, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, filename, url, created_at],
            )?;
            Ok(Photo {
                id: conn.last_insert_rowid(),
                user_id,
                filename,
                url,
                created_at,
            })
        })
        .await
    }

    /// Remove one of `user_id`'s photos and return the deleted row.
    /// Photos owned by someone else are reported as not found.
    pub async fn delete_photo(&self, user_id: UserId, photo_id: i64) -> Result<Photo, StoreError> {
        self.call(move |conn| {
            let photo = conn
                .query_row(
                    "SELECT id, user_id, filename, url, created_at FROM photos
                     WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![photo_id, user_id],
                    photo_from_row,
                )
                .optional()?
                .ok_or(StoreError::NotFound("photo"))?;
            conn.execute(
                "DELETE FROM photos WHERE id = ?1",
                rusqlite::params![photo.id],
            )?;
            Ok(photo)
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserInfo>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT id, username, created_at FROM users ORDER BY id")?;
            let users = stmt
                .query_map([], user_info_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    /// Find the direct room shared by two users, creating it when absent.
    pub async fn get_or_create_direct_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<DirectRoom, StoreError> {
        self.call(move |conn| {
            let recipient_exists = conn
                .query_row(
                    "SELECT 1 FROM users WHERE id = ?1",
                    rusqlite::params![user_b],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !recipient_exists {
                return Err(StoreError::NotFound("user"));
            }

            let tx = conn.unchecked_transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT r.id FROM rooms r
                     JOIN room_participants p1 ON r.id = p1.room_id
                     JOIN room_participants p2 ON r.id = p2.room_id
                     WHERE r.type = 'direct' AND p1.user_id = ?1 AND p2.user_id = ?2
                     LIMIT 1",
                    rusqlite::params![user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(room_id) = existing {
                return Ok(DirectRoom {
                    room_id,
                    is_new: false,
                });
            }

            let room_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO rooms (id, type, created_at) VALUES (?1, 'direct', ?2)",
                rusqlite::params![room_id, Utc::now().timestamp_millis()],
            )?;
            tx.execute(
                "INSERT INTO room_participants (room_id, user_id) VALUES (?1, ?2), (?1, ?3)",
                rusqlite::params![room_id, user_a, user_b],
            )?;
            tx.commit()?;

            Ok(DirectRoom {
                room_id,
                is_new: true,
            })
        })
        .await
    }

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserInfo, StoreError> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        self.call(move |conn| {
            let created_at = Utc::now().timestamp_millis();
            let inserted = conn.execute(
                "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![username, password_hash, created_at],
            );
            match inserted {
                Ok(_) => Ok(UserInfo {
                    id: conn.last_insert_rowid(),
                    username,
                    created_at,
                }),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::UsernameTaken)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn user_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let username = username.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                    rusqlite::params![username],
                    |row| {
                        Ok(UserCredentials {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            password_hash: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    // An unreadable stored reply is dropped rather than failing the whole history.
    let reply_to = row
        .get::<_, Option<String>>(7)?
        .and_then(|json| serde_json::from_str::<ReplyPreview>(&json).ok());

    Ok(MessageRow {
        id: row.get(0)?,
        room: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        voice: row.get(5)?,
        has_seen: row.get(6)?,
        reply_to,
        created_at: row.get(8)?,
    })
}

fn user_info_from_row(row: &Row<'_>) -> rusqlite::Result<UserInfo> {
    Ok(UserInfo {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        user_id: row.get(1)?,
        filename: row.get(2)?,
        url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn photos_of(conn: &Connection, user_id: UserId) -> rusqlite::Result<Vec<Photo>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, filename, url, created_at FROM photos
         WHERE user_id = ?1 ORDER BY created_at, id",
    )?;
    let photos = stmt
        .query_map(rusqlite::params![user_id], photo_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(photos)
}
