use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use wisp_types::api::Claims;
use wisp_types::models::PublicUser;

use crate::auth::AppState;
use crate::convert;
use crate::error::ApiError;

/// The verified caller, resolved from the bearer token. Inserted into
/// request extensions; the hash was stripped during conversion.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

/// Identity verification: decode the bearer JWT, check signature and expiry,
/// resolve the subject to a stored user. Every failure mode — missing header,
/// malformed token, bad signature, expired, unknown user — collapses to the
/// same Unauthenticated rejection.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Token rejected: {}", e);
        ApiError::Unauthenticated
    })?;

    let user_id = token_data.claims.sub.to_string();
    let row = tokio::task::spawn_blocking({
        let state = state.clone();
        move || state.db.get_user_by_id(&user_id)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(|_| ApiError::Unauthenticated)?
    .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(CurrentUser(convert::public_user(row)));
    Ok(next.run(req).await)
}
