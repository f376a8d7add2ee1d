use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use ion_types::events::{IdentityPayload, MessagePayload, ServerEvent, TypingPayload};
use ion_types::models::{StoredMessage, UserDisplay};

use crate::error::{ConnectError, SendError};
use crate::registry::{RoomRegistry, SessionHandle};
use crate::session::Session;
use crate::store::MessageStore;
use crate::typing::{LapsedTyping, TypingTracker};

/// Longest text message accepted, in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 4000;
/// Longest image reference accepted, in characters.
pub const MAX_IMAGE_REF_CHARS: usize = 2048;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long a typing signal stays live without a refresh.
    pub typing_expiry: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            typing_expiry: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostKind {
    Text,
    Image,
}

struct CachedDisplay {
    display: UserDisplay,
    /// Live sessions of this user; the entry goes when it reaches zero.
    sessions: usize,
}

/// Owns the room registry and routes every realtime event: persistence
/// through the store, fan-out through the registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn MessageStore>,

    registry: RwLock<RoomRegistry>,

    /// Display data of connected users: user_id -> cached display
    displays: RwLock<HashMap<Uuid, CachedDisplay>>,

    typing: Mutex<TypingTracker>,

    /// Bumped by every profile refresh, so a connect that raced one reloads.
    display_epoch: AtomicU64,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MessageStore>, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                registry: RwLock::new(RoomRegistry::new()),
                displays: RwLock::new(HashMap::new()),
                typing: Mutex::new(TypingTracker::new(config.typing_expiry)),
                display_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    // -- Session lifecycle --

    /// Looks up a user's display data without caching it. Used to refuse a
    /// handshake before any session exists.
    pub async fn lookup_user(&self, user_id: Uuid) -> Result<UserDisplay, ConnectError> {
        if let Some(cached) = self.inner.displays.read().await.get(&user_id) {
            return Ok(cached.display.clone());
        }
        self.inner
            .store
            .user_display(user_id)
            .await
            .map_err(|e| ConnectError::Store(e.to_string()))?
            .ok_or(ConnectError::UnknownUser(user_id))
    }

    /// Opens a session for a verified user and queues its `identity` event.
    /// The receiver is the session's outbound queue.
    pub async fn connect(
        &self,
        user_id: Uuid,
    ) -> Result<(Session, mpsc::UnboundedReceiver<ServerEvent>), ConnectError> {
        loop {
            let epoch = self.inner.display_epoch.load(Ordering::Acquire);
            let display = self.lookup_user(user_id).await?;

            let mut displays = self.inner.displays.write().await;
            match displays.entry(user_id) {
                Entry::Occupied(mut entry) => entry.get_mut().sessions += 1,
                Entry::Vacant(entry) => {
                    // A profile change landed during the lookup; load again.
                    if self.inner.display_epoch.load(Ordering::Acquire) != epoch {
                        continue;
                    }
                    entry.insert(CachedDisplay {
                        display,
                        sessions: 1,
                    });
                }
            }
            break;
        }

        let (handle, rx) = SessionHandle::new(user_id);
        handle.send(ServerEvent::Identity(IdentityPayload { user_id }));
        debug!("{} opened session {}", user_id, handle.conn_id());

        Ok((Session::new(handle), rx))
    }

    /// Tears a session down: leaves every room, clears its typing indicators
    /// for the remaining members, and releases its display cache entry.
    pub async fn disconnect(&self, handle: &SessionHandle) {
        let conn_id = handle.conn_id();
        let rooms = self.inner.registry.write().await.remove_session(conn_id);

        let lapsed = self.inner.typing.lock().await.drop_session(conn_id);
        self.relay_lapsed(lapsed).await;

        let mut displays = self.inner.displays.write().await;
        if let Some(entry) = displays.get_mut(&handle.user_id()) {
            entry.sessions = entry.sessions.saturating_sub(1);
            if entry.sessions == 0 {
                displays.remove(&handle.user_id());
            }
        }

        debug!("{} closed session {} ({} rooms)", handle.user_id(), conn_id, rooms.len());
    }

    /// Joins a room. Idempotent; returns true if newly joined.
    pub async fn join_room(&self, session: &mut Session, room_id: &str) -> bool {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return false;
        }
        let added = self
            .inner
            .registry
            .write()
            .await
            .join(room_id, session.handle());
        session.rooms_mut().insert(room_id.to_string());
        added
    }

    /// Leaves a room, clearing any typing indicator there.
    pub async fn leave_room(&self, session: &mut Session, room_id: &str) -> bool {
        let room_id = room_id.trim();
        let removed = self
            .inner
            .registry
            .write()
            .await
            .leave(room_id, session.conn_id());
        session.rooms_mut().remove(room_id);

        let cleared = {
            let mut tracker = self.inner.typing.lock().await;
            tracker.stop(room_id, session.conn_id())
                && !tracker.user_typing(room_id, session.user_id())
        };
        if cleared {
            let username = self.display_for(session.user_id()).await.map(|d| d.username);
            if let Ok(username) = username {
                self.relay_lapsed(vec![LapsedTyping {
                    room_id: room_id.to_string(),
                    conn_id: session.conn_id(),
                    user_id: session.user_id(),
                    username,
                }])
                .await;
            }
        }
        removed
    }

    // -- Fan-out --

    /// Persists a text message stamped with the session's identity, then
    /// broadcasts it to the room.
    pub async fn send_message(
        &self,
        session: &Session,
        room_id: &str,
        content: &str,
    ) -> Result<StoredMessage, SendError> {
        let room_id = validate_room(room_id)?;
        let content = validate_text(content)?;
        self.spawn_fan_out(session.user_id(), room_id, content, PostKind::Text)
            .await
    }

    /// Same contract as `send_message` for a pre-uploaded image reference.
    pub async fn send_image(
        &self,
        session: &Session,
        room_id: &str,
        image_ref: &str,
    ) -> Result<StoredMessage, SendError> {
        let room_id = validate_room(room_id)?;
        let image_ref = validate_image_ref(image_ref)?;
        self.spawn_fan_out(session.user_id(), room_id, image_ref, PostKind::Image)
            .await
    }

    /// Runs persist-then-broadcast as its own task so that losing the sender
    /// mid-write does not cancel the write or the peers' broadcast.
    async fn spawn_fan_out(
        &self,
        sender_id: Uuid,
        room_id: String,
        content: String,
        kind: PostKind,
    ) -> Result<StoredMessage, SendError> {
        let this = self.clone();
        tokio::spawn(async move { this.fan_out(sender_id, room_id, content, kind).await })
            .await
            .map_err(|e| {
                error!("fan-out task failed: {}", e);
                SendError::Interrupted
            })?
    }

    async fn fan_out(
        &self,
        sender_id: Uuid,
        room_id: String,
        content: String,
        kind: PostKind,
    ) -> Result<StoredMessage, SendError> {
        let display = self.display_for(sender_id).await?;

        let stored = self
            .inner
            .store
            .create_message(&content, sender_id, &room_id)
            .await
            .map_err(|e| {
                error!("Failed to store message from {} in room {}: {}", sender_id, room_id, e);
                SendError::Persistence(e.to_string())
            })?;

        let payload = MessagePayload {
            message_id: stored.id,
            room_id: room_id.clone(),
            sender_id,
            content,
            username: display.username,
            avatar_ref: display.avatar_ref,
            timestamp: stored.created_at,
        };
        let event = match kind {
            PostKind::Text => ServerEvent::ChatMessage(payload),
            PostKind::Image => ServerEvent::SendImage(payload),
        };

        // Membership is read now, after the write, not before it.
        let delivered = self.inner.registry.read().await.broadcast(&room_id, &event);
        debug!(
            "{:?} {} from {} delivered to {} sessions in room {}",
            kind, stored.id, sender_id, delivered, room_id
        );

        Ok(stored)
    }

    // -- Typing --

    /// Relays a typing signal to every other session in the room, under the
    /// sender's server-side username.
    pub async fn typing(&self, session: &Session, room_id: &str, typing: bool) {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return;
        }
        let username = match self.display_for(session.user_id()).await {
            Ok(display) => display.username,
            Err(e) => {
                debug!("dropping typing signal from {}: {}", session.user_id(), e);
                return;
            }
        };

        {
            let mut tracker = self.inner.typing.lock().await;
            if typing {
                tracker.start(
                    room_id,
                    session.conn_id(),
                    session.user_id(),
                    &username,
                    Instant::now(),
                );
            } else {
                tracker.stop(room_id, session.conn_id());
                // Another tab of the same user is still typing here.
                if tracker.user_typing(room_id, session.user_id()) {
                    return;
                }
            }
        }

        let event = ServerEvent::Typing(TypingPayload {
            room_id: room_id.to_string(),
            username,
            typing,
        });
        self.inner
            .registry
            .read()
            .await
            .broadcast_except(room_id, session.conn_id(), &event);
    }

    /// Clears typing signals whose window elapsed, relaying `typing:false`.
    /// Returns how many were cleared.
    pub async fn sweep_typing(&self, now: Instant) -> usize {
        let lapsed = self.inner.typing.lock().await.expire(now);
        let count = lapsed.len();
        self.relay_lapsed(lapsed).await;
        count
    }

    /// Runs `sweep_typing` every `period` until the runtime shuts down.
    pub fn spawn_typing_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let cleared = this.sweep_typing(Instant::now()).await;
                if cleared > 0 {
                    debug!("Expired {} stale typing indicators", cleared);
                }
            }
        })
    }

    async fn relay_lapsed(&self, lapsed: Vec<LapsedTyping>) {
        if lapsed.is_empty() {
            return;
        }
        let registry = self.inner.registry.read().await;
        for entry in lapsed {
            let event = ServerEvent::Typing(TypingPayload {
                room_id: entry.room_id.clone(),
                username: entry.username,
                typing: false,
            });
            registry.broadcast_except(&entry.room_id, entry.conn_id, &event);
        }
    }

    // -- Display cache --

    /// Replaces the cached display data of a connected user after a profile
    /// change. Users without live sessions are not cached and are ignored.
    pub async fn refresh_display(&self, user_id: Uuid, display: UserDisplay) {
        let mut displays = self.inner.displays.write().await;
        self.inner.display_epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(entry) = displays.get_mut(&user_id) {
            info!("Refreshed display data for {}", user_id);
            entry.display = display;
        }
    }

    async fn display_for(&self, user_id: Uuid) -> Result<UserDisplay, SendError> {
        if let Some(cached) = self.inner.displays.read().await.get(&user_id) {
            return Ok(cached.display.clone());
        }
        self.inner
            .store
            .user_display(user_id)
            .await
            .map_err(|e| {
                error!("Failed to look up display data for {}: {}", user_id, e);
                SendError::Persistence(e.to_string())
            })?
            .ok_or(SendError::UnknownSender(user_id))
    }

    // -- Introspection --

    pub async fn room_members(&self, room_id: &str) -> usize {
        self.inner.registry.read().await.member_count(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.registry.read().await.room_count()
    }
}

fn validate_room(room_id: &str) -> Result<String, SendError> {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return Err(SendError::EmptyRoom);
    }
    Ok(room_id.to_string())
}

fn validate_text(content: &str) -> Result<String, SendError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SendError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(SendError::ContentTooLong {
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(content.to_string())
}

fn validate_image_ref(image_ref: &str) -> Result<String, SendError> {
    let image_ref = image_ref.trim();
    if image_ref.is_empty()
        || image_ref.chars().count() > MAX_IMAGE_REF_CHARS
        || image_ref.chars().any(char::is_whitespace)
    {
        return Err(SendError::InvalidImageRef);
    }
    Ok(image_ref.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(validate_text("  hello \n").unwrap(), "hello");
        assert_eq!(validate_text(" \t\n"), Err(SendError::EmptyContent));
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(validate_text(&long), Err(SendError::ContentTooLong { .. })));
        assert!(validate_text(&"é".repeat(MAX_CONTENT_CHARS)).is_ok());
    }

    #[test]
    fn image_refs_must_be_single_tokens() {
        assert!(validate_image_ref("https://cdn.example.com/a.png").is_ok());
        assert_eq!(validate_image_ref(""), Err(SendError::InvalidImageRef));
        assert_eq!(validate_image_ref("a b.png"), Err(SendError::InvalidImageRef));
    }

    #[test]
    fn blank_rooms_are_rejected() {
        assert_eq!(validate_room("  "), Err(SendError::EmptyRoom));
        assert_eq!(validate_room(" 42 ").unwrap(), "42");
    }
}
