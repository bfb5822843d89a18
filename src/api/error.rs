use crate::auth::IdentityError;
use crate::credentials::CipherError;
use crate::resolver::ResolveError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Shown to end users when a stored key exists but cannot be used.
pub const CREDENTIAL_UNAVAILABLE: &str =
    "Credential unavailable, try another or contact support";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types
#[derive(Debug, PartialEq)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        AppError::Unauthorized(format!("Invalid identity: {}", e))
    }
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NoCredential { platform } => AppError::BadRequest(format!(
                "No {} API key available. Add your own key to continue.",
                platform
            )),
            ResolveError::Unauthorized => {
                AppError::Unauthorized("Sign in to use a saved API key".to_string())
            }
            ResolveError::KeyUnavailable { platform, .. } => AppError::BadRequest(format!(
                "The selected {} API key is no longer available. Choose another key.",
                platform
            )),
            // Record id already logged by the resolver
            ResolveError::Corrupted { .. } => {
                AppError::InternalServerError(CREDENTIAL_UNAVAILABLE.to_string())
            }
            ResolveError::Storage(e) => {
                error!(error = %format!("{:#}", e), "Credential lookup failed");
                AppError::InternalServerError("Failed to look up credential".to_string())
            }
        }
    }
}

/// Maps store errors: cipher validation failures are the caller's fault,
/// everything else is logged and hidden.
pub fn from_store_error(e: anyhow::Error, action: &str) -> AppError {
    if let Some(cipher_error) = e.downcast_ref::<CipherError>() {
        if cipher_error.kind().is_client_error() {
            return AppError::BadRequest(cipher_error.to_string());
        }
    }

    error!(error = %format!("{:#}", e), action = action, "Credential store operation failed");
    AppError::InternalServerError(format!("Failed to {}", action))
}
