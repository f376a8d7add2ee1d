use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RoomId;

/// Events sent FROM server TO client over the realtime gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once after the handshake credential was verified.
    Identity(IdentityPayload),

    /// A text message was posted to a room.
    ChatMessage(MessagePayload),

    /// An image message was posted to a room. Stored like any other message,
    /// tagged separately on the wire.
    SendImage(MessagePayload),

    /// Another member of a room started or stopped typing.
    Typing(TypingPayload),

    /// Outcome of a send, delivered to the sending session only.
    Ack(AckPayload),
}

impl ServerEvent {
    /// Returns the room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::ChatMessage(p) | Self::SendImage(p) => Some(&p.room_id),
            Self::Typing(p) => Some(&p.room_id),
            Self::Identity(_) | Self::Ack(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPayload {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message_id: Uuid,
    pub room_id: RoomId,
    pub sender_id: Uuid,
    pub content: String,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: RoomId,
    pub username: String,
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Commands sent FROM client TO server over the realtime gateway.
///
/// Payloads never carry a sender identity: the server stamps every write with
/// the identity bound to the connection. Unknown fields (including any
/// client-supplied `userId`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    SendMessage(SendMessagePayload),
    SendImage(SendImagePayload),
    Typing(TypingSignal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: RoomId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImagePayload {
    pub room_id: RoomId,
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub room_id: RoomId,
    pub typing: bool,
}
