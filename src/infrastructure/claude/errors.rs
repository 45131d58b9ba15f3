use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::error::GenerationError;

/// Errors that can occur when interacting with the Claude API
#[derive(Error, Debug)]
pub enum ClaudeApiError {
    /// Invalid request parameters (HTTP 400)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or missing API key (HTTP 401)
    #[error("Invalid API key - authentication failed")]
    InvalidApiKey,

    /// Forbidden - permission denied (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// Rate limit exceeded (HTTP 429). Carries the time the backend
    /// accepts requests again.
    #[error("Rate limit exceeded - retry after {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Server error from Claude API (HTTP 500, 502, 503, 504, 529)
    #[error("Server error ({0}): {1}")]
    ServerError(StatusCode, String),

    /// Network or connection error
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response arrived but could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Unknown or unexpected error
    #[error("Unknown error ({0}): {1}")]
    UnknownError(StatusCode, String),
}

impl ClaudeApiError {
    /// Classify a non-success response.
    ///
    /// `reset_at` is only used for 429 responses.
    pub fn from_status(status: StatusCode, body: String, reset_at: DateTime<Utc>) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::InvalidRequest(body),
            StatusCode::UNAUTHORIZED => Self::InvalidApiKey,
            StatusCode::FORBIDDEN => Self::Forbidden(body),
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited { reset_at },
            status if status.is_server_error() || status.as_u16() == 529 => {
                Self::ServerError(status, body)
            }
            status => Self::UnknownError(status, body),
        }
    }

    /// Returns true if this error is transient and should be retried.
    ///
    /// Rate limiting is not retried here: the caller schedules around the
    /// reset time instead of burning retries against it.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServerError(_, _) | Self::NetworkError(_) | Self::MalformedResponse(_)
        )
    }
}

impl From<ClaudeApiError> for GenerationError {
    fn from(err: ClaudeApiError) -> Self {
        match err {
            ClaudeApiError::RateLimited { reset_at } => Self::Throttled { reset_at },
            err if err.is_transient() => Self::Transient(err.to_string()),
            err => Self::Fatal(err.to_string()),
        }
    }
}
