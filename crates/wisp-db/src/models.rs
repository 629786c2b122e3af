/// Database row types — these map directly to SQLite rows.
/// Distinct from the wisp-types API models so the DB layer stays independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub seen: bool,
    pub created_at: String,
}
