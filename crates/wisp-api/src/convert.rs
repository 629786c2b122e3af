use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use wisp_db::models::{MessageRow, UserRow};
use wisp_types::models::{Message, PublicUser};

/// SQLite default timestamps are "YYYY-MM-DD HH:MM:SS" without timezone;
/// rows written by us carry RFC 3339. Accept both, treating naive as UTC.
pub(crate) fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}

fn parse_id(raw: &str, field: &str, row_id: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on row '{}': {}", field, raw, row_id, e);
        Uuid::default()
    })
}

/// UserRow -> API user. The credential hash stops here.
pub(crate) fn public_user(row: UserRow) -> PublicUser {
    let created_at = parse_timestamp(&row.created_at, &row.id);
    PublicUser {
        id: parse_id(&row.id, "user id", &row.id),
        email: row.email,
        full_name: row.full_name,
        bio: row.bio,
        avatar_url: row.avatar_url,
        created_at,
    }
}

pub(crate) fn message(row: MessageRow) -> Message {
    let created_at = parse_timestamp(&row.created_at, &row.id);
    Message {
        id: parse_id(&row.id, "message id", &row.id),
        sender_id: parse_id(&row.sender_id, "sender_id", &row.id),
        receiver_id: parse_id(&row.receiver_id, "receiver_id", &row.id),
        text: row.text,
        image_url: row.image_url,
        seen: row.seen,
        created_at,
    }
}
