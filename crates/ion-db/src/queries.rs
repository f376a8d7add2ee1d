use crate::Database;
use crate::models::{MemberRow, MessageRow, ServerRow, UserRow, WriteOutcome};
use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use ion_types::models::UserDisplay;
use rand::Rng;
use rusqlite::{Connection, params};

/// Characters used in invite codes (URL-safe).
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
const INVITE_CODE_LEN: usize = 6;
const INVITE_CODE_ATTEMPTS: usize = 8;

impl Database {
    // -- Users --

    /// `Conflict` if the username or email is already registered.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        avatar_ref: Option<&str>,
    ) -> Result<WriteOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, avatar_ref) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, username, email, password_hash, avatar_ref],
            );
            outcome(inserted)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_display(&self, id: &str) -> Result<Option<UserDisplay>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT username, avatar_ref FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserDisplay {
                        username: row.get(0)?,
                        avatar_ref: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn touch_last_login(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?2 WHERE id = ?1",
                params![id, format_timestamp(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Returns false if no such user exists.
    pub fn update_avatar(&self, id: &str, avatar_ref: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar_ref = ?2 WHERE id = ?1",
                params![id, avatar_ref],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn change_username(&self, id: &str, username: &str) -> Result<WriteOutcome> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET username = ?2 WHERE id = ?1",
                params![id, username],
            );
            outcome(updated)
        })
    }

    /// Deletes an account together with the servers it owns, their history,
    /// its memberships and every message it sent.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE room_id IN (SELECT id FROM servers WHERE owner_id = ?1)",
                [id],
            )?;
            // servers, server_members and the user's own messages cascade
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Servers --

    /// Creates a server owned by `owner_id`, who also becomes its first
    /// member. Returns `None` if the name is already taken.
    pub fn create_server(&self, id: &str, name: &str, owner_id: &str) -> Result<Option<ServerRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM servers WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )?;
            if taken {
                return Ok(None);
            }

            let invite_code = unused_invite_code(&tx)?;
            tx.execute(
                "INSERT INTO servers (id, name, owner_id, invite_code) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, owner_id, invite_code],
            )?;
            tx.execute(
                "INSERT INTO server_members (server_id, user_id) VALUES (?1, ?2)",
                params![id, owner_id],
            )?;
            let row = query_server(&tx, "id", id)?
                .ok_or_else(|| anyhow!("Server vanished after insert: {}", id))?;

            tx.commit()?;
            Ok(Some(row))
        })
    }

    pub fn get_server(&self, id: &str) -> Result<Option<ServerRow>> {
        self.with_conn(|conn| query_server(conn, "id", id))
    }

    pub fn get_server_by_invite(&self, invite_code: &str) -> Result<Option<ServerRow>> {
        self.with_conn(|conn| query_server(conn, "invite_code", invite_code))
    }

    pub fn list_servers_for_user(&self, user_id: &str) -> Result<Vec<ServerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.owner_id, s.invite_code, s.created_at
                 FROM servers s
                 JOIN server_members m ON m.server_id = s.id
                 WHERE m.user_id = ?1
                 ORDER BY m.joined_at ASC, s.name ASC",
            )?;
            let rows = stmt
                .query_map([user_id], server_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Renames a server. The caller checks ownership.
    pub fn rename_server(&self, id: &str, name: &str) -> Result<WriteOutcome> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE servers SET name = ?2 WHERE id = ?1",
                params![id, name],
            );
            outcome(updated)
        })
    }

    /// Members of a server other than its owner, in join order.
    pub fn list_members(&self, server_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.avatar_ref
                 FROM server_members m
                 JOIN users u ON u.id = m.user_id
                 JOIN servers s ON s.id = m.server_id
                 WHERE m.server_id = ?1 AND m.user_id != s.owner_id
                 ORDER BY m.joined_at ASC, u.username ASC",
            )?;
            let rows = stmt
                .query_map([server_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        avatar_ref: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the user already was a member.
    pub fn add_member(&self, server_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO server_members (server_id, user_id) VALUES (?1, ?2)",
                params![server_id, user_id],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn is_member(&self, server_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM server_members WHERE server_id = ?1 AND user_id = ?2)",
                params![server_id, user_id],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    pub fn remove_member(&self, server_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM server_members WHERE server_id = ?1 AND user_id = ?2",
                params![server_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Deletes a server with its memberships and its room's history.
    pub fn delete_server(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE room_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM servers WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Messages --

    /// Inserts a message and returns its store-assigned creation time, which
    /// is never earlier than that of any previous insert.
    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<DateTime<Utc>> {
        let mut last = self
            .last_message_at
            .lock()
            .map_err(|e| anyhow!("Message clock lock poisoned: {}", e))?;

        let now = truncate_to_micros(Utc::now());
        let created_at = if now > *last { now } else { *last };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, room_id, sender_id, content, format_timestamp(created_at)],
            )?;
            Ok(())
        })?;

        *last = created_at;
        Ok(created_at)
    }

    /// Full history of a room, oldest first. Insertion order breaks ties.
    pub fn get_messages(&self, room_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, room_id))
    }

    pub(crate) fn latest_message_at(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
        latest.as_deref().map(parse_timestamp).transpose()
    }
}

/// Fixed-width RFC 3339 in UTC, so lexical order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| anyhow!("Bad timestamp '{}': {}", raw, e))
}

fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

fn unused_invite_code(conn: &Connection) -> Result<String> {
    for _ in 0..INVITE_CODE_ATTEMPTS {
        let code = generate_invite_code();
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM servers WHERE invite_code = ?1)",
            [&code],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(code);
        }
    }
    Err(anyhow!("Could not find a free invite code"))
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input.
    let sql = format!(
        "SELECT id, username, email, password, avatar_ref, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            avatar_ref: row.get(4)?,
            created_at: row.get(5)?,
        })
    })
    .optional()
}

fn query_server(conn: &Connection, column: &str, value: &str) -> Result<Option<ServerRow>> {
    let sql = format!(
        "SELECT id, name, owner_id, invite_code, created_at FROM servers WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], server_from_row).optional()
}

fn server_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerRow> {
    Ok(ServerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        invite_code: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_messages(conn: &Connection, room_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch display data in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.room_id, m.sender_id, u.username, u.avatar_ref, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.room_id = ?1
         ORDER BY m.created_at ASC, m.seq ASC",
    )?;

    let rows = stmt
        .query_map([room_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room_id: row.get(1)?,
                sender_id: row.get(2)?,
                username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                avatar_ref: row.get(4)?,
                content: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Maps the row count of an INSERT/UPDATE, turning unique violations into
/// `Conflict`.
fn outcome(result: rusqlite::Result<usize>) -> Result<WriteOutcome> {
    match result {
        Ok(0) => Ok(WriteOutcome::Missing),
        Ok(_) => Ok(WriteOutcome::Applied),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(WriteOutcome::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
