use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use ion_db::Database;
use ion_db::models::MessageRow;
use ion_db::queries::parse_timestamp;
use ion_types::models::{HistoryEntry, StoredMessage, UserDisplay};

/// The persistence operations the realtime core relies on.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persists a message; the store assigns its id and creation time.
    async fn create_message(&self, content: &str, sender_id: Uuid, room_id: &str) -> Result<StoredMessage>;

    async fn user_display(&self, user_id: Uuid) -> Result<Option<UserDisplay>>;

    /// A room's history, ascending by creation time.
    async fn list_messages(&self, room_id: &str) -> Result<Vec<HistoryEntry>>;
}

/// `MessageStore` over the SQLite database. Calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(&self, content: &str, sender_id: Uuid, room_id: &str) -> Result<StoredMessage> {
        let db = self.db.clone();
        let id = Uuid::new_v4();
        let (mid, rid, sid, body) = (id.to_string(), room_id.to_string(), sender_id.to_string(), content.to_string());

        let created_at = tokio::task::spawn_blocking(move || db.insert_message(&mid, &rid, &sid, &body))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        Ok(StoredMessage { id, created_at })
    }

    async fn user_display(&self, user_id: Uuid) -> Result<Option<UserDisplay>> {
        let db = self.db.clone();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || db.get_user_display(&uid))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<HistoryEntry>> {
        let db = self.db.clone();
        let rid = room_id.to_string();
        let rows = tokio::task::spawn_blocking(move || db.get_messages(&rid))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        Ok(rows.into_iter().filter_map(history_entry).collect())
    }
}

/// Rows with unreadable ids or timestamps are skipped with a warning rather
/// than failing the whole history.
fn history_entry(row: MessageRow) -> Option<HistoryEntry> {
    let id = row
        .id
        .parse::<Uuid>()
        .map_err(|e| warn!("Corrupt message id '{}': {}", row.id, e))
        .ok()?;
    let sender_id = row
        .sender_id
        .parse::<Uuid>()
        .map_err(|e| warn!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e))
        .ok()?;
    let created_at = parse_timestamp(&row.created_at)
        .map_err(|e| warn!("Corrupt created_at on message '{}': {}", row.id, e))
        .ok()?;

    Some(HistoryEntry {
        id,
        room_id: row.room_id,
        content: row.content,
        sender_id,
        username: row.username,
        avatar_ref: row.avatar_ref,
        created_at,
    })
}
