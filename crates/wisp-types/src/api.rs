use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, PublicUser};

// -- JWT Claims --

/// JWT claims shared between wisp-api (REST middleware) and wisp-server
/// (token issuance). Canonical definition lives here in wisp-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub bio: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub user: PublicUser,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct CheckAuthResponse {
    pub success: bool,
    pub user: PublicUser,
}

// -- Profile --

/// All fields optional; omitted fields are left untouched.
/// `avatar` carries a base64 data URI which the server stores and
/// replaces with a serving URL.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateProfileResponse {
    pub success: bool,
    pub user: PublicUser,
}

/// Bare success acknowledgement for operations with no payload.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    /// Base64 data URI; stored out of band, the message row keeps only the URL.
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub success: bool,
    pub messages: Vec<Message>,
}

/// Sidebar payload: everyone except the caller, plus per-peer unseen counts.
/// Peers with zero unseen messages are omitted from the map entirely.
#[derive(Debug, Serialize)]
pub struct SidebarResponse {
    pub success: bool,
    pub users: Vec<PublicUser>,
    pub unseen: HashMap<Uuid, u64>,
}
