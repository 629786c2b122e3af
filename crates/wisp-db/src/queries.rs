use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        full_name: &str,
        bio: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, full_name, bio, password) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, full_name, bio, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, email, full_name, bio, avatar_url, password, created_at FROM users WHERE email = ?1", email)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, email, full_name, bio, avatar_url, password, created_at FROM users WHERE id = ?1", id)
        })
    }

    /// Everyone except the given user, for the sidebar.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, full_name, bio, avatar_url, password, created_at
                 FROM users WHERE id != ?1 ORDER BY full_name",
            )?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Partial profile update: None fields are left as-is.
    /// Returns the updated row, or None if the user does not exist.
    pub fn update_profile(
        &self,
        id: &str,
        full_name: Option<&str>,
        bio: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                     full_name  = COALESCE(?2, full_name),
                     bio        = COALESCE(?3, bio),
                     avatar_url = COALESCE(?4, avatar_url)
                 WHERE id = ?1",
                (id, full_name, bio, avatar_url),
            )?;
            query_user(conn, "SELECT id, email, full_name, bio, avatar_url, password, created_at FROM users WHERE id = ?1", id)
        })
    }

    // -- Messages --

    /// `created_at` is stamped by the caller (RFC 3339 with millis) so the
    /// value returned to the sender is byte-identical to the stored row.
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        text: Option<&str>,
        image_url: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, sender_id, receiver_id, text, image_url, created_at],
            )?;
            Ok(())
        })
    }

    /// Full conversation between two users, both directions, creation order.
    /// rowid breaks ties between rows stamped within the same instant.
    pub fn messages_between(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, text, image_url, seen, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Bulk seen flip for everything `sender_id` sent to `receiver_id`.
    /// Idempotent: already-seen rows are untouched. Returns rows changed.
    pub fn mark_seen_from(&self, sender_id: &str, receiver_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET seen = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                (sender_id, receiver_id),
            )?;
            Ok(n)
        })
    }

    /// Flip a single message to seen. Only the message's receiver may do so;
    /// an unknown id and someone else's message both report false.
    pub fn mark_seen_by_id(&self, id: &str, receiver_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND receiver_id = ?2",
                    (id, receiver_id),
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if exists {
                conn.execute(
                    "UPDATE messages SET seen = 1 WHERE id = ?1 AND receiver_id = ?2",
                    (id, receiver_id),
                )?;
            }
            Ok(exists)
        })
    }

    pub fn count_unseen(&self, sender_id: &str, receiver_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: u64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                (sender_id, receiver_id),
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    /// Unseen counts for a receiver, grouped by sender. Senders with zero
    /// unseen messages do not appear in the result at all.
    pub fn unseen_counts(&self, receiver_id: &str) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND seen = 0
                 GROUP BY sender_id",
            )?;
            let rows = stmt
                .query_map([receiver_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt.query_row([key], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        bio: row.get(3)?,
        avatar_url: row.get(4)?,
        password: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image_url: row.get(4)?,
        seen: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
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
