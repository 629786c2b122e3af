use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as exposed over the API — the credential hash never leaves the
/// persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A direct message between two users.
///
/// Exactly one of `text` / `image_url` is populated. Immutable once created
/// except for `seen`, which only ever flips false -> true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}
