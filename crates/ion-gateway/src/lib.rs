//! Realtime messaging core: the session lifecycle, room registry, message
//! fan-out and typing relay behind the `/gateway` WebSocket.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod session;
pub mod store;
pub mod typing;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ConnectError, SendError};
pub use registry::{RoomRegistry, SessionHandle};
pub use session::Session;
pub use store::{MessageStore, SqliteStore};

#[cfg(test)]
mod tests;
