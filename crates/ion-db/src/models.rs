/// Database row types. These map directly to SQLite rows and stay distinct
/// from the ion-types wire models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub avatar_ref: Option<String>,
    pub created_at: String,
}

pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub invite_code: String,
    pub created_at: String,
}

pub struct MemberRow {
    pub user_id: String,
    pub username: String,
    pub avatar_ref: Option<String>,
}

/// Result of a write that can hit a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// No row matched.
    Missing,
    /// A unique column already holds the value.
    Conflict,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub content: String,
    pub created_at: String,
}
