//! Error types for Chronofeed
//!
//! All errors crossing the HTTP boundary are converted to `AppError`,
//! which implements `IntoResponse` with a stable kind/status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Each variant maps to one stable `kind` string and HTTP status.
/// Internal details (database, anyhow chains) never reach the response body.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Unique constraint violated by the caller (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream platform failure (502)
    #[error("Upstream API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Token encryption failed (500)
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Token decryption failed (500)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// OAuth code/refresh exchange failed (502)
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Fetching the platform identity failed (502)
    #[error("User fetch failed: {0}")]
    UserFetchFailed(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Conflict(_) => "conflict",
            AppError::ApiError { .. } => "api_error",
            AppError::EncryptionFailed(_) => "encryption_failed",
            AppError::DecryptionFailed => "decryption_failed",
            AppError::TokenExchangeFailed(_) => "token_exchange_failed",
            AppError::UserFetchFailed(_) => "user_fetch_failed",
            AppError::Database(_) => "db_error",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ApiError { .. }
            | AppError::TokenExchangeFailed(_)
            | AppError::UserFetchFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::EncryptionFailed(_)
            | AppError::DecryptionFailed
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller
    pub(crate) fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Config(_) => "Server misconfigured".to_string(),
            AppError::EncryptionFailed(_) => "Encryption failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let kind = self.kind();

        if status.is_server_error() {
            tracing::error!(error = %self, kind, "Request failed");
        }

        crate::metrics::ERRORS_TOTAL.with_label_values(&[kind]).inc();

        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
