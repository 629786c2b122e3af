use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use wisp_db::Database;
use wisp_gateway::registry::PresenceRegistry;
use wisp_media::ImageStore;
use wisp_types::api::{
    AuthResponse, CheckAuthResponse, Claims, LoginRequest, SignupRequest, UpdateProfileRequest,
    UpdateProfileResponse,
};

use crate::convert;
use crate::error::ApiError;
use crate::middleware::CurrentUser;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub registry: PresenceRegistry,
    pub images: ImageStore,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.full_name.trim().is_empty()
        || req.email.trim().is_empty()
        || req.password.is_empty()
        || req.bio.trim().is_empty()
    {
        return Err(ApiError::Validation("Missing details".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("Password must be at least 8 characters".into()));
    }

    let user_id = Uuid::new_v4();

    // Argon2id and the SQLite calls are blocking work; run them off the
    // async runtime
    let row = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            if state
                .db
                .get_user_by_email(req.email.trim())
                .map_err(ApiError::Internal)?
                .is_some()
            {
                return Err(ApiError::Conflict("Account already exists".into()));
            }

            // Hash password with Argon2id
            let salt = SaltString::generate(&mut OsRng);
            let argon2 = Argon2::default();
            let password_hash = argon2
                .hash_password(req.password.as_bytes(), &salt)
                .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash: {}", e)))?
                .to_string();

            state
                .db
                .create_user(
                    &user_id.to_string(),
                    req.email.trim(),
                    req.full_name.trim(),
                    req.bio.trim(),
                    &password_hash,
                )
                .map_err(|e| {
                    // a concurrent signup can win the UNIQUE race after the
                    // lookup above; that is still a duplicate account
                    if wisp_db::is_unique_violation(&e) {
                        ApiError::Conflict("Account already exists".into())
                    } else {
                        ApiError::Internal(e)
                    }
                })?;

            state
                .db
                .get_user_by_id(&user_id.to_string())
                .map_err(ApiError::Internal)?
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished after signup")))
        }
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    let token = create_token(&state.jwt_secret, user_id)?;

    info!("New account {} ({})", row.email, user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            user: convert::public_user(row),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown email and wrong password are indistinguishable to the caller.
    // Verification is CPU-bound, so the whole lookup+verify runs blocking.
    let user = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            let user = state
                .db
                .get_user_by_email(&req.email)
                .map_err(ApiError::Internal)?
                .ok_or(ApiError::Unauthenticated)?;

            let parsed_hash = PasswordHash::new(&user.password)
                .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;

            Argon2::default()
                .verify_password(req.password.as_bytes(), &parsed_hash)
                .map_err(|_| ApiError::Unauthenticated)?;

            Ok::<_, ApiError>(user)
        }
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;

    let token = create_token(&state.jwt_secret, user_id)?;

    Ok(Json(AuthResponse {
        success: true,
        user: convert::public_user(user),
        token,
    }))
}

/// For clients re-validating a stored token on startup.
pub async fn check_auth(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<CheckAuthResponse> {
    Json(CheckAuthResponse {
        success: true,
        user,
    })
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let avatar_url = match req.avatar.as_deref() {
        Some(data_uri) => Some(
            state
                .images
                .store_data_uri(data_uri)
                .await
                .map_err(ApiError::Upstream)?,
        ),
        None => None,
    };

    let row = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            state.db.update_profile(
                &user.id.to_string(),
                req.full_name.as_deref(),
                req.bio.as_deref(),
                avatar_url.as_deref(),
            )
        }
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(UpdateProfileResponse {
        success: true,
        user: convert::public_user(row),
    }))
}

pub fn create_token(secret: &str, user_id: Uuid) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state() -> AppState {
        let db = wisp_db::Database::open_in_memory().unwrap();
        let media_dir = std::env::temp_dir().join(format!("wisp-auth-test-{}", Uuid::new_v4()));
        let images = wisp_media::ImageStore::new(media_dir, "http://localhost/media".into())
            .await
            .unwrap();
        Arc::new(AppStateInner {
            db,
            jwt_secret: "test-secret".into(),
            registry: PresenceRegistry::new(),
            images,
        })
    }

    fn signup_req(email: &str) -> SignupRequest {
        SignupRequest {
            full_name: "Alice".into(),
            email: email.into(),
            password: "correct horse".into(),
            bio: "hi".into(),
        }
    }

    #[tokio::test]
    async fn signup_then_login_roundtrip() {
        let state = test_state().await;

        let created = signup(State(state.clone()), Json(signup_req("a@example.com"))).await;
        assert!(created.is_ok());

        let ok = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "a@example.com".into(),
                password: "correct horse".into(),
            }),
        )
        .await;
        assert!(ok.is_ok());

        // wrong password and unknown email reject identically
        for (email, password) in [("a@example.com", "wrong"), ("nobody@example.com", "correct horse")] {
            match login(
                State(state.clone()),
                Json(LoginRequest {
                    email: email.into(),
                    password: password.into(),
                }),
            )
            .await
            {
                Err(ApiError::Unauthenticated) => {}
                Err(other) => panic!("expected Unauthenticated, got {}", other),
                Ok(_) => panic!("login should have been rejected"),
            }
        }
    }

    #[tokio::test]
    async fn duplicate_signup_is_a_conflict() {
        let state = test_state().await;

        assert!(signup(State(state.clone()), Json(signup_req("dup@example.com")))
            .await
            .is_ok());

        match signup(State(state), Json(signup_req("dup@example.com"))).await {
            Err(ApiError::Conflict(_)) => {}
            Err(other) => panic!("expected Conflict, got {}", other),
            Ok(_) => panic!("duplicate signup should have been rejected"),
        }
    }

    #[tokio::test]
    async fn signup_rejects_missing_details() {
        let state = test_state().await;
        let req = SignupRequest {
            full_name: "  ".into(),
            email: "b@example.com".into(),
            password: "correct horse".into(),
            bio: "hi".into(),
        };
        match signup(State(state), Json(req)).await {
            Err(ApiError::Validation(_)) => {}
            Err(other) => panic!("expected Validation, got {}", other),
            Ok(_) => panic!("signup should have been rejected"),
        }
    }
}
