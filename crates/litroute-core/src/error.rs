//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

use crate::checkpoint::{CheckpointError, WorkflowId};

/// Failure reported by an external collaborator (library, extractor, classifier).
///
/// This is the only error type that crosses the collaborator traits; client
/// errors are mapped into it at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// The call did not complete in time.
    #[error("timed out")]
    Timeout,

    /// The service asked the caller to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Server-requested wait, if given.
        retry_after: Option<Duration>,
    },

    /// The service is temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The item changed since it was read.
    #[error("item {0} was modified concurrently")]
    VersionConflict(String),

    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered with something that could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The service refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<litroute_zotero::Error> for ExternalError {
    fn from(err: litroute_zotero::Error) -> Self {
        use litroute_zotero::Error as Z;

        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        match err {
            Z::VersionConflict { key, .. } => Self::VersionConflict(key),
            Z::NotFound(what) => Self::NotFound(what),
            Z::Json(e) => Self::InvalidResponse(e.to_string()),
            Z::Status { status: 408, .. } => Self::Timeout,
            Z::Status {
                status: 429,
                retry_after,
                ..
            } => Self::RateLimited { retry_after },
            Z::Status {
                status: 502..=504,
                message,
                ..
            } => Self::Unavailable(message),
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        match err.status().map(|s| s.as_u16()) {
            Some(404) => Self::NotFound(err.url().map_or_else(String::new, ToString::to_string)),
            Some(408) => Self::Timeout,
            Some(429) => Self::RateLimited { retry_after: None },
            Some(502..=504) => Self::Unavailable(err.to_string()),
            _ if err.is_decode() => Self::InvalidResponse(err.to_string()),
            _ => Self::Rejected(err.to_string()),
        }
    }
}

impl From<litroute_llm::Error> for ExternalError {
    fn from(err: litroute_llm::Error) -> Self {
        use litroute_llm::{ApiErrorCode, Error as L};

        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        match err {
            L::Api {
                code: ApiErrorCode::RateLimited,
                retry_after,
                ..
            } => Self::RateLimited { retry_after },
            L::Api {
                code: ApiErrorCode::Unavailable,
                message,
                ..
            } => Self::Unavailable(message),
            L::Json(e) => Self::InvalidResponse(e.to_string()),
            L::EmptyCompletion => Self::InvalidResponse("empty completion".into()),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A run stopped because its progress could no longer be persisted.
    ///
    /// Everything up to `checkpointed` items is safely recorded.
    #[error("workflow {workflow} aborted after {checkpointed} checkpointed items: {source}")]
    RunAborted {
        /// Workflow that stopped.
        workflow: WorkflowId,
        /// Items safely recorded before the failure.
        checkpointed: usize,
        /// Underlying persistence failure.
        #[source]
        source: CheckpointError,
    },

    /// Checkpoint store operation failed outside a run.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// No checkpoint exists for the workflow id.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// An external call failed outside per-item processing.
    #[error("Library error: {0}")]
    External(#[from] ExternalError),

    /// A named collection could not be resolved.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zotero client could not be constructed.
    #[error("Zotero client error: {0}")]
    Zotero(#[from] litroute_zotero::Error),

    /// Chat client could not be constructed.
    #[error("LLM client error: {0}")]
    Llm(#[from] litroute_llm::Error),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
