//! Credentials for Ion: session tokens, password hashes and the cookie that
//! carries the token.
//!
//! Leaf crate shared by the HTTP API and the realtime gateway so both layers
//! verify identities the same way.

pub mod cookie;
pub mod error;
pub mod password;
pub mod token;

pub use cookie::{TOKEN_COOKIE, cleared_cookie, session_cookie, token_from_headers};
pub use error::{AuthError, PasswordError};
pub use password::{hash_password, verify_password};
pub use token::TokenService;
