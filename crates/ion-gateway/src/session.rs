use std::collections::HashSet;

use tracing::{debug, info};
use uuid::Uuid;

use ion_types::RoomId;
use ion_types::events::{AckPayload, ClientCommand, ServerEvent};
use ion_types::models::StoredMessage;

use crate::dispatcher::Dispatcher;
use crate::error::SendError;
use crate::registry::SessionHandle;

/// One authenticated realtime connection.
///
/// A `Session` only exists once its credential was verified; its identity is
/// fixed for its lifetime and stamps every write it makes. Rooms joined are
/// tracked here and mirrored in the dispatcher's registry.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    rooms: HashSet<RoomId>,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            rooms: HashSet::new(),
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.handle.conn_id()
    }

    pub fn user_id(&self) -> Uuid {
        self.handle.user_id()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn rooms(&self) -> &HashSet<RoomId> {
        &self.rooms
    }

    pub fn is_joined(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }

    pub(crate) fn rooms_mut(&mut self) -> &mut HashSet<RoomId> {
        &mut self.rooms
    }
}

/// Applies one client command to a session. Failures stay local to this
/// command: they are acknowledged or logged, never propagated.
pub async fn handle_command(dispatcher: &Dispatcher, session: &mut Session, cmd: ClientCommand) {
    match cmd {
        ClientCommand::JoinRoom(room_id) => {
            if dispatcher.join_room(session, &room_id).await {
                info!("{} ({}) joined room {}", session.user_id(), session.conn_id(), room_id);
            }
        }

        ClientCommand::LeaveRoom(room_id) => {
            if dispatcher.leave_room(session, &room_id).await {
                info!("{} ({}) left room {}", session.user_id(), session.conn_id(), room_id);
            }
        }

        ClientCommand::SendMessage(payload) => {
            let result = dispatcher
                .send_message(session, &payload.room_id, &payload.content)
                .await;
            acknowledge(session, payload.request_id, result);
        }

        ClientCommand::SendImage(payload) => {
            let result = dispatcher
                .send_image(session, &payload.room_id, &payload.image_ref)
                .await;
            acknowledge(session, payload.request_id, result);
        }

        ClientCommand::Typing(signal) => {
            dispatcher.typing(session, &signal.room_id, signal.typing).await;
        }
    }
}

fn acknowledge(session: &Session, request_id: Option<String>, result: Result<StoredMessage, SendError>) {
    let ack = match result {
        Ok(stored) => AckPayload {
            request_id,
            ok: true,
            message_id: Some(stored.id),
            created_at: Some(stored.created_at),
            error: None,
        },
        Err(e) => {
            debug!("{} ({}) send rejected: {}", session.user_id(), session.conn_id(), e);
            AckPayload {
                request_id,
                ok: false,
                message_id: None,
                created_at: None,
                error: Some(e.to_string()),
            }
        }
    };
    session.handle().send(ServerEvent::Ack(ack));
}
