use thiserror::Error;

/// Why a presented credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("access denied, no token provided")]
    Missing,

    /// Malformed token or bad signature.
    #[error("invalid token")]
    Invalid,

    #[error("token used before its valid date")]
    NotYetValid,

    #[error("token expired")]
    Expired,

    #[error("could not sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
}
