//! Session registry: which live session belongs to which user, and which
//! room each session is currently viewing.
//!
//! All three maps sit behind one `RwLock`, so a `register`/`unregister` and the
//! online check it reports on are a single atomic step. Readers (fan-out
//! enumeration, presence checks) share the lock; mutations take it exclusively.
//! Nothing here awaits while holding the lock.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ConnectionSender, SessionId};
use crate::db::models::UserId;

/// Metadata kept for one live transport session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: UserId,
    pub username: String,
    pub handle: ConnectionSender,
    room: Option<String>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    /// room id -> joined sessions; never holds an empty set
    rooms: HashMap<String, HashSet<SessionId>>,
    /// user id -> live sessions; never holds an empty set
    users: HashMap<UserId, HashSet<SessionId>>,
}

impl Inner {
    fn remove_from_room(&mut self, room: &str, session_id: &SessionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(session_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new session. Returns true when the user had no other live
    /// session, i.e. this is the user's online edge.
    pub fn register(
        &self,
        session_id: SessionId,
        user_id: UserId,
        username: &str,
        handle: ConnectionSender,
    ) -> bool {
        let mut guard = self.write();
        let inner = &mut *guard;

        // Re-registering an id replaces the old entry without double counting.
        if let Some(old) = inner.sessions.remove(&session_id) {
            if let Some(room) = &old.room {
                inner.remove_from_room(room, &session_id);
            }
            if let Some(set) = inner.users.get_mut(&old.user_id) {
                set.remove(&session_id);
                if set.is_empty() {
                    inner.users.remove(&old.user_id);
                }
            }
        }

        inner.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                username: username.to_string(),
                handle,
                room: None,
            },
        );

        let sessions = inner.users.entry(user_id).or_default();
        sessions.insert(session_id);
        let first = sessions.len() == 1;

        tracing::debug!(
            session_id = %session_id,
            user_id = user_id,
            sessions = sessions.len(),
            "Session registered"
        );

        first
    }

    /// Remove a session and its room membership. Returns true when this was the
    /// user's last live session. Unknown ids are a no-op returning false.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        let mut guard = self.write();
        let inner = &mut *guard;

        let Some(entry) = inner.sessions.remove(session_id) else {
            return false;
        };

        if let Some(room) = &entry.room {
            inner.remove_from_room(room, session_id);
        }

        let mut went_offline = false;
        if let Some(set) = inner.users.get_mut(&entry.user_id) {
            set.remove(session_id);
            if set.is_empty() {
                inner.users.remove(&entry.user_id);
                went_offline = true;
            }
        }

        tracing::debug!(
            session_id = %session_id,
            user_id = entry.user_id,
            went_offline,
            "Session unregistered"
        );

        went_offline
    }

    /// Add a session to a room, moving it out of any other room first.
    /// Leave notifications for the previous room are the caller's job.
    pub fn join(&self, room: &str, session_id: &SessionId) {
        let mut guard = self.write();
        let inner = &mut *guard;

        let previous = match inner.sessions.get_mut(session_id) {
            Some(entry) => entry.room.replace(room.to_string()),
            None => return,
        };

        if let Some(previous) = previous.filter(|prev| prev != room) {
            inner.remove_from_room(&previous, session_id);
        }

        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(*session_id);
    }

    /// Remove a session from a room, dropping the room entry once it is empty.
    pub fn leave(&self, room: &str, session_id: &SessionId) {
        let mut guard = self.write();
        let inner = &mut *guard;

        inner.remove_from_room(room, session_id);

        if let Some(entry) = inner.sessions.get_mut(session_id) {
            if entry.room.as_deref() == Some(room) {
                entry.room = None;
            }
        }
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.read().users.contains_key(&user_id)
    }

    /// Whether any of the user's sessions is joined to `room`.
    pub fn is_user_in_room(&self, user_id: UserId, room: &str) -> bool {
        let inner = self.read();
        let (Some(sessions), Some(members)) = (inner.users.get(&user_id), inner.rooms.get(room))
        else {
            return false;
        };
        sessions.iter().any(|id| members.contains(id))
    }

    pub fn count_sessions(&self, user_id: UserId) -> usize {
        self.read().users.get(&user_id).map_or(0, HashSet::len)
    }

    /// Handles of every live session of a user.
    pub fn sessions_of(&self, user_id: UserId) -> Vec<ConnectionSender> {
        let inner = self.read();
        inner
            .users
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id))
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn room_of(&self, session_id: &SessionId) -> Option<String> {
        self.read()
            .sessions
            .get(session_id)
            .and_then(|entry| entry.room.clone())
    }

    pub fn has_room(&self, room: &str) -> bool {
        self.read().rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.read().rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Visit every session joined to `room` except `exclude`, under the read lock.
    pub fn for_each_in_room<F>(&self, room: &str, exclude: Option<&SessionId>, mut f: F)
    where
        F: FnMut(&SessionId, &SessionEntry),
    {
        let inner = self.read();
        let Some(members) = inner.rooms.get(room) else {
            return;
        };
        for id in members {
            if Some(id) == exclude {
                continue;
            }
            if let Some(entry) = inner.sessions.get(id) {
                f(id, entry);
            }
        }
    }

    /// Visit every live session of a user, under the read lock.
    pub fn for_each_of_user<F>(&self, user_id: UserId, mut f: F)
    where
        F: FnMut(&SessionId, &SessionEntry),
    {
        let inner = self.read();
        let Some(sessions) = inner.users.get(&user_id) else {
            return;
        };
        for id in sessions {
            if let Some(entry) = inner.sessions.get(id) {
                f(id, entry);
            }
        }
    }
}
