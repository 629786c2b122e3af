use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failure taxonomy for the REST surface. Every variant renders as
/// `{"success": false, "message": ...}` with a matching HTTP status;
/// handlers never leak raw errors or panics to the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad, missing or expired credential. Deliberately carries no detail:
    /// the caller must not learn which check failed.
    #[error("Unauthorized")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Storage or media backend unavailable.
    #[error("Service temporarily unavailable")]
    Upstream(#[source] anyhow::Error),

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(source) => error!("Upstream failure: {:#}", source),
            ApiError::Internal(source) => error!("Internal error: {:#}", source),
            _ => {}
        }

        let body = ErrorBody {
            success: false,
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_message_is_uniform() {
        // the body must not reveal which auth check failed
        assert_eq!(ApiError::Unauthenticated.to_string(), "Unauthorized");
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Upstream(anyhow::anyhow!("down")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
