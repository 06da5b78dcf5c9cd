//! Error types for chat-completion calls.

use std::time::Duration;

/// Result type alias for chat-completion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse category of an API error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Invalid or missing credentials.
    Authentication,
    /// Rate limit exceeded.
    RateLimited,
    /// Model not found or not available.
    ModelNotFound,
    /// Prompt exceeded the model context.
    ContextLength,
    /// Upstream temporarily unavailable (502/503/504).
    Unavailable,
    /// Other server error.
    Server,
    /// Anything else.
    Unknown,
}

impl ApiErrorCode {
    /// Determine the error code from the HTTP status and the error `type` field.
    #[must_use]
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401 | 403, _) => Self::Authentication,
            (429, _) => Self::RateLimited,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLength,
            (502..=504, _) => Self::Unavailable,
            (500..=599, _) => Self::Server,
            _ => Self::Unknown,
        }
    }

    /// Whether a request failing with this code may succeed when repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable)
    }
}

/// Chat-completion error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not valid JSON of the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with an error status.
    #[error("API error {status} ({code:?}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error category.
        code: ApiErrorCode,
        /// Message from the error body, or the raw body.
        message: String,
        /// Delay requested through `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The response contained no choices or an empty message.
    #[error("Empty completion")]
    EmptyCompletion,

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns the HTTP status code associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout()) || self.status() == Some(408)
    }

    /// Whether the connection could not be established.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect())
    }
}
