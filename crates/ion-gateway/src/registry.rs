use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use uuid::Uuid;

use ion_types::RoomId;
use ion_types::events::ServerEvent;

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: Uuid,
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    /// Creates a handle with a fresh connection id. The receiver is drained
    /// by the connection's writer task.
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            conn_id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queues an event. Returns false once the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Maps room ids to the sessions currently joined to them.
///
/// Rooms exist only while at least one session is joined. Not synchronized:
/// the dispatcher owns it behind a lock.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, HashMap<Uuid, SessionHandle>>,
    /// conn_id -> rooms it is joined to
    joined: HashMap<Uuid, HashSet<RoomId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session to a room. Idempotent; returns true if it was not
    /// already joined.
    pub fn join(&mut self, room_id: &str, handle: &SessionHandle) -> bool {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        let added = members.insert(handle.conn_id, handle.clone()).is_none();
        self.joined
            .entry(handle.conn_id)
            .or_default()
            .insert(room_id.to_string());
        added
    }

    /// Removes a session from one room. Returns true if it was joined.
    pub fn leave(&mut self, room_id: &str, conn_id: Uuid) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(members) => {
                let removed = members.remove(&conn_id).is_some();
                if members.is_empty() {
                    self.rooms.remove(room_id);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.joined.remove(&conn_id);
            }
        }
        removed
    }

    /// Removes a session from every room it joined and returns those rooms.
    pub fn remove_session(&mut self, conn_id: Uuid) -> Vec<RoomId> {
        let rooms: Vec<RoomId> = self
            .joined
            .remove(&conn_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            if let Some(members) = self.rooms.get_mut(room_id) {
                members.remove(&conn_id);
                if members.is_empty() {
                    self.rooms.remove(room_id);
                }
            }
        }
        rooms
    }

    pub fn is_joined(&self, room_id: &str, conn_id: Uuid) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(&conn_id))
    }

    pub fn rooms_of(&self, conn_id: Uuid) -> Vec<RoomId> {
        self.joined
            .get(&conn_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Delivers `event` to every session in the room. Returns how many queues
    /// accepted it.
    pub fn broadcast(&self, room_id: &str, event: &ServerEvent) -> usize {
        self.deliver(room_id, None, event)
    }

    /// Like `broadcast`, skipping one connection.
    pub fn broadcast_except(&self, room_id: &str, except: Uuid, event: &ServerEvent) -> usize {
        self.deliver(room_id, Some(except), event)
    }

    fn deliver(&self, room_id: &str, except: Option<Uuid>, event: &ServerEvent) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };
        members
            .values()
            .filter(|handle| Some(handle.conn_id) != except)
            .filter(|handle| handle.send(event.clone()))
            .count()
    }
}
