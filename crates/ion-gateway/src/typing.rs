use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use ion_types::RoomId;

/// Upper bound on the typing window. Longer configured windows are clamped.
pub const MAX_TYPING_EXPIRY: Duration = Duration::from_secs(300);

/// Typing signal that ended without an explicit stop: it expired, or its
/// session left the room or disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapsedTyping {
    pub room_id: RoomId,
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug)]
struct ActiveTyping {
    user_id: Uuid,
    username: String,
    expires_at: Instant,
}

/// Server-side record of which sessions are typing where, so indicators can
/// be cleared for peers whose stop signal never arrives.
///
/// Entries are per connection, but observers see one indicator per user, so
/// callers only relay `typing:false` once `user_typing` turns false.
#[derive(Debug)]
pub struct TypingTracker {
    expiry: Duration,
    active: HashMap<(RoomId, Uuid), ActiveTyping>,
}

impl TypingTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry: expiry.min(MAX_TYPING_EXPIRY),
            active: HashMap::new(),
        }
    }

    /// Records or refreshes a typing signal. Returns true if it is new.
    pub fn start(
        &mut self,
        room_id: &str,
        conn_id: Uuid,
        user_id: Uuid,
        username: &str,
        now: Instant,
    ) -> bool {
        let entry = ActiveTyping {
            user_id,
            username: username.to_string(),
            expires_at: now + self.expiry,
        };
        self.active
            .insert((room_id.to_string(), conn_id), entry)
            .is_none()
    }

    /// Returns true if the session was typing in the room.
    pub fn stop(&mut self, room_id: &str, conn_id: Uuid) -> bool {
        self.active.remove(&(room_id.to_string(), conn_id)).is_some()
    }

    pub fn is_typing(&self, room_id: &str, conn_id: Uuid) -> bool {
        self.active.contains_key(&(room_id.to_string(), conn_id))
    }

    /// True while any connection of the user is typing in the room.
    pub fn user_typing(&self, room_id: &str, user_id: Uuid) -> bool {
        self.active
            .iter()
            .any(|((room, _), typing)| room == room_id && typing.user_id == user_id)
    }

    /// Forgets everything a session was typing. Returns the indicators that
    /// went out, i.e. those no other connection of the user keeps alive.
    pub fn drop_session(&mut self, conn_id: Uuid) -> Vec<LapsedTyping> {
        self.drain_where(|(_, cid), _| *cid == conn_id)
    }

    /// Removes entries whose window has elapsed. Returns the indicators that
    /// went out, as `drop_session` does.
    pub fn expire(&mut self, now: Instant) -> Vec<LapsedTyping> {
        self.drain_where(|_, typing| typing.expires_at <= now)
    }

    fn drain_where<F>(&mut self, pred: F) -> Vec<LapsedTyping>
    where
        F: Fn(&(RoomId, Uuid), &ActiveTyping) -> bool,
    {
        let keys: Vec<(RoomId, Uuid)> = self
            .active
            .iter()
            .filter(|(key, typing)| pred(key, typing))
            .map(|(key, _)| key.clone())
            .collect();

        let removed: Vec<LapsedTyping> = keys
            .into_iter()
            .filter_map(|key| {
                self.active.remove(&key).map(|typing| LapsedTyping {
                    room_id: key.0,
                    conn_id: key.1,
                    user_id: typing.user_id,
                    username: typing.username,
                })
            })
            .collect();

        let mut lapsed: Vec<LapsedTyping> = Vec::with_capacity(removed.len());
        for entry in removed {
            let already = lapsed
                .iter()
                .any(|l| l.room_id == entry.room_id && l.user_id == entry.user_id);
            if !already && !self.user_typing(&entry.room_id, entry.user_id) {
                lapsed.push(entry);
            }
        }
        lapsed
    }
}
