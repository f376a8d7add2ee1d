pub mod api;
pub mod content;
pub mod events;
pub mod models;
pub mod typing;

/// Rooms are keyed by an opaque string (the owning server's id).
pub type RoomId = String;
