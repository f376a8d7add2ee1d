use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use ion_types::events::ServerEvent;
use ion_types::models::{HistoryEntry, StoredMessage, UserDisplay};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::session::Session;
use crate::store::MessageStore;

/// In-memory store whose writes can be switched off to simulate an outage,
/// or slowed down to hold a call open across a disconnect.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, UserDisplay>>,
    messages: Mutex<Vec<HistoryEntry>>,
    down: AtomicBool,
    write_delay_ms: AtomicU64,
    display_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn add_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            id,
            UserDisplay {
                username: username.to_string(),
                avatar_ref: Some(format!("https://cdn.example.com/{username}.png")),
            },
        );
        id
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_avatar(&self, user_id: Uuid, avatar_ref: Option<String>) {
        if let Some(display) = self.users.lock().unwrap().get_mut(&user_id) {
            display.avatar_ref = avatar_ref;
        }
    }

    pub fn display(&self, user_id: Uuid) -> UserDisplay {
        self.users.lock().unwrap()[&user_id].clone()
    }

    /// Every later write sleeps this long before it is recorded.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Display lookups read the row, then sleep this long before answering.
    pub fn set_display_delay(&self, delay: Duration) {
        self.display_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<HistoryEntry> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, content: &str, sender_id: Uuid, room_id: &str) -> Result<StoredMessage> {
        if self.down.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        pause(&self.write_delay_ms).await;
        let display = self
            .users
            .lock()
            .unwrap()
            .get(&sender_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such sender"))?;

        let stored = StoredMessage {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(HistoryEntry {
            id: stored.id,
            room_id: room_id.to_string(),
            content: content.to_string(),
            sender_id,
            username: display.username,
            avatar_ref: display.avatar_ref,
            created_at: stored.created_at,
        });
        Ok(stored)
    }

    async fn user_display(&self, user_id: Uuid) -> Result<Option<UserDisplay>> {
        let display = self.users.lock().unwrap().get(&user_id).cloned();
        pause(&self.display_delay_ms).await;
        Ok(display)
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }
}

async fn pause(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
        Self { store, dispatcher }
    }

    /// Connects a fresh user and consumes the `identity` event.
    pub async fn client(&self, username: &str) -> Client {
        let user_id = self.store.add_user(username);
        self.client_for(user_id).await
    }

    /// Opens another session for an existing user.
    pub async fn client_for(&self, user_id: Uuid) -> Client {
        let (session, mut rx) = self.dispatcher.connect(user_id).await.unwrap();
        match rx.try_recv() {
            Ok(ServerEvent::Identity(p)) => assert_eq!(p.user_id, user_id),
            other => panic!("expected identity first, got {:?}", other),
        }
        Client { session, rx }
    }
}

pub struct Client {
    pub session: Session,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    pub fn user_id(&self) -> Uuid {
        self.session.user_id()
    }

    /// Everything queued for this client so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
