//! Error types for Zotero API operations.

use std::time::Duration;

/// Result type alias for Zotero API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Zotero API error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL construction error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The server answered with a non-success status.
    #[error("Zotero API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
        /// Delay requested through `Retry-After` or `Backoff`, if any.
        retry_after: Option<Duration>,
    },

    /// The item changed since the version used for the write (HTTP 412).
    #[error("Item {key} was modified since version {version}")]
    VersionConflict {
        /// Item key.
        key: String,
        /// Version token that was sent.
        version: u64,
    },

    /// The requested object does not exist (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A multi-object write reported a per-object failure.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns the HTTP status code associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::VersionConflict { .. } => Some(412),
            Self::NotFound(_) => Some(404),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns the server-requested delay before retrying, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the request timed out before a response arrived.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessors() {
        let err = Error::Status {
            status: 429,
            message: "Too Many Requests".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_conflict_maps_to_412() {
        let err = Error::VersionConflict {
            key: "ABCD1234".into(),
            version: 7,
        };
        assert_eq!(err.status(), Some(412));
        assert!(err.to_string().contains("ABCD1234"));
    }

    #[test]
    fn test_request_timeout_status() {
        let err = Error::Status {
            status: 408,
            message: String::new(),
            retry_after: None,
        };
        assert!(err.is_timeout());
    }
}
