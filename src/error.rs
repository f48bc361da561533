//! Backend error types with HTTP status code mapping.
//!
//! [`BackendError`] is the central error type for the service. Each variant
//! maps to a numeric error code, an HTTP status code and a structured JSON
//! error response. Callers classify errors with [`BackendError::is_not_found`],
//! [`BackendError::is_not_modified`] and [`BackendError::is_conflict`] rather
//! than comparing against sentinel values.

use std::time::Duration;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::EventSnapshot;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "not found: session abc"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`BackendError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category                 | HTTP Status                  |
/// |-----------|--------------------------|------------------------------|
/// | 1000–1999 | Validation               | 400 Bad Request              |
/// | 2000–2999 | Lookup / control flow    | 304 / 404 / 409              |
/// | 3000–3999 | Infrastructure           | 500 Internal Server Error    |
/// | 4000–4999 | Retryable delivery       | 503 Service Unavailable      |
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional read matched one of the caller's etags.
    ///
    /// Carries a partial snapshot with only the fingerprint and the
    /// modification time set.
    #[error("not modified")]
    NotModified(Box<EventSnapshot>),

    /// A concurrent writer got there first.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream schedule source failed or returned garbage.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Result cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Work queue failure.
    #[error("queue error: {0}")]
    Queue(String),

    /// Per-user data store failure.
    #[error("user store error: {0}")]
    UserStore(String),

    /// Push delivery could not be attempted.
    #[error("push error: {0}")]
    Push(String),

    /// The operation failed but may succeed if retried later.
    #[error("retry later ({}s): {message}", retry_after.as_secs())]
    Retryable {
        /// What went wrong.
        message: String,
        /// Suggested delay before the next attempt.
        retry_after: Duration,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Returns `true` for "doesn't exist", as opposed to "couldn't check".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` when a conditional read matched a caller etag.
    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified(_))
    }

    /// Returns `true` when the failure came from a concurrent writer.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns the backoff hint carried by retryable errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Retryable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::NotFound(_) => 2001,
            Self::NotModified(_) => 2002,
            Self::Conflict(_) => 2003,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::Cache(_) => 3002,
            Self::Queue(_) => 3003,
            Self::UserStore(_) => 3004,
            Self::Upstream(_) => 3005,
            Self::Serialization(_) => 3006,
            Self::Push(_) => 3007,
            Self::Retryable { .. } => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotModified(_) => StatusCode::NOT_MODIFIED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Retryable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_)
            | Self::Persistence(_)
            | Self::Cache(_)
            | Self::Queue(_)
            | Self::UserStore(_)
            | Self::Upstream(_)
            | Self::Serialization(_)
            | Self::Push(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            // 40001 serialization_failure, 40P01 deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                Self::Conflict(err.to_string())
            }
            _ => Self::Persistence(err.to_string()),
        }
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        if let Self::NotModified(partial) = &self {
            return (
                StatusCode::NOT_MODIFIED,
                [(header::ETAG, format!("\"{}\"", partial.fingerprint))],
            )
                .into_response();
        }

        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
