//! Error types and HTTP error response handling.
//!
//! This module defines all request-path errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//! Startup failures live in [`crate::config::ConfigurationError`] instead.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::store::StoreError;

/// Application-wide request error.
///
/// # Error Categories
///
/// - **Validation**: missing or malformed request fields (400)
/// - **Authentication / Authorization**: no valid session (401), wrong role (403)
/// - **Resource**: unknown credential id (404)
/// - **Conflict**: concurrent activation lost the race (409), retry
/// - **Rate limiting**: too many login attempts from one source (429)
/// - **Persistence / Crypto**: internal failures (500), details only in logs
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    /// Never says whether the target resource exists.
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Administrator role required")]
    Forbidden,

    #[error("Credential not found")]
    NotFound,

    #[error("Another activation committed concurrently; retry the request")]
    Conflict,

    #[error("Too many login attempts; try again later")]
    RateLimited,

    #[error("Stored secret could not be processed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Persistence(#[source] sqlx::Error),

    #[error("Stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::Conflict => AppError::Conflict,
            StoreError::Database(e) => AppError::Persistence(e),
            StoreError::Crypto(e) => AppError::Crypto(e),
            StoreError::Corrupt(msg) => AppError::Corrupt(msg),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Persistence(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "validation_error",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Internal failures are logged with a fresh correlation id, which is the only
/// detail echoed to the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            AppError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "unauthenticated", self.to_string())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AppError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", self.to_string())
            }
            AppError::Crypto(_)
            | AppError::Persistence(_)
            | AppError::Corrupt(_)
            | AppError::Internal(_) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    format!("An internal error occurred (ref {correlation_id})"),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
