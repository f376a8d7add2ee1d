use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RoomId;

/// What other members see of a user next to their messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisplay {
    pub username: String,
    pub avatar_ref: Option<String>,
}

/// Store-assigned identity of a freshly persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One entry of a room's chat history, as replayed by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub room_id: RoomId,
    pub content: String,
    pub sender_id: Uuid,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}
