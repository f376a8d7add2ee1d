use thiserror::Error;
use uuid::Uuid;

/// Why a send was refused or lost. The display text is what the sending
/// client sees in its `ack`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("room id is empty")]
    EmptyRoom,

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("image reference is invalid")]
    InvalidImageRef,

    #[error("sender has no profile")]
    UnknownSender(Uuid),

    /// Store write or lookup failed; details are logged server-side only.
    #[error("message could not be stored")]
    Persistence(String),

    #[error("send was interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("user {0} does not exist")]
    UnknownUser(Uuid),

    #[error("store unavailable: {0}")]
    Store(String),
}
