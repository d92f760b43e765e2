use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use super::jwt::TokenError;
use super::repo::DirectoryError;

/// Outcome of a failed auth operation. Every variant except `Internal` is an
/// expected business result.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is temporarily locked")]
    AccountLocked,
    #[error("user with this email already exists")]
    DuplicateEmail,
    #[error("authentication required")]
    Unauthenticated,
    #[error("insufficient role")]
    Forbidden,
    #[error("store did not answer in time")]
    Timeout,
    #[error("concurrent updates kept conflicting")]
    Contention,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::DuplicateEmail => "duplicate_email",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Forbidden => "forbidden",
            AuthError::Timeout | AuthError::Contention => "service_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidRequest(_) | AuthError::DuplicateEmail => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::AccountLocked | AuthError::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Timeout | AuthError::Contention => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing text. Internal causes never appear here.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidRequest(msg) => (*msg).to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".into(),
            AuthError::AccountLocked => "Account is temporarily locked".into(),
            AuthError::DuplicateEmail => "User with this email already exists".into(),
            AuthError::Unauthenticated => "Invalid or expired token".into(),
            AuthError::Forbidden => "Insufficient permissions".into(),
            AuthError::Timeout | AuthError::Contention => {
                "Service temporarily unavailable, retry later".into()
            }
            AuthError::Internal(_) => "An unexpected error occurred".into(),
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DuplicateEmail => AuthError::DuplicateEmail,
            DirectoryError::StaleVersion(_) => AuthError::Contention,
            DirectoryError::Timeout(after) => {
                warn!(?after, "user directory timed out");
                AuthError::Timeout
            }
            other => AuthError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unauthenticated => AuthError::Unauthenticated,
            other => AuthError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(cause) = &self {
            error!(error = ?cause, "internal error");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
