//! services/client/src/error.rs
//!
//! Defines the error types of the client: the request taxonomy every API call
//! reports, the resource-handle errors, and the top-level error of the binary.

use crate::config::ConfigError;
use library_core::ports::PortError;
use library_core::BookId;

/// Message shown for binary payloads whose declared type is wrong.
pub const INVALID_FILE_MESSAGE: &str = "Invalid file format or file unavailable";

/// The outcome of a failed API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The exchange itself failed (connection refused, timeout, ...).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The response broke the API contract: no boolean `success` indicator,
    /// or a payload that does not have the documented shape.
    #[error("Invalid API response format: {0}")]
    Protocol(String),

    /// The server refused the operation and said why.
    #[error("{0}")]
    Business(String),

    /// The session is no longer valid. Already handled globally.
    #[error("Unauthorized: the session has expired")]
    Unauthorized,

    /// A binary endpoint answered with an unexpected content type.
    #[error("Invalid file format: expected {expected}, got {}", .actual.as_deref().unwrap_or("no content type"))]
    InvalidFileFormat {
        expected: String,
        actual: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    /// A non-success status without any usable error message.
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
}

impl RequestError {
    /// The message to show the user: the server's own wording when there is
    /// one, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            RequestError::Business(message) | RequestError::NotFound(message) => message.clone(),
            RequestError::InvalidFileFormat { .. } => INVALID_FILE_MESSAGE.to_string(),
            _ => fallback.to_string(),
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Transport(_) => true,
            RequestError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<PortError> for RequestError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => RequestError::NotFound(what),
            PortError::Unauthorized => RequestError::Unauthorized,
            PortError::Transport(message) => RequestError::Transport(message),
            other => RequestError::Transport(other.to_string()),
        }
    }
}

/// Failures of the resource handle lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The book file could not be loaded. The slot can be retried.
    #[error("Content of book {book_id} is unavailable: {message}")]
    ContentUnavailable { book_id: BookId, message: String },

    /// The fetch completed after its slot was released; its handle was
    /// released instead of installed.
    #[error("The resource was released before it finished loading")]
    Discarded,

    /// The owning view has already been torn down.
    #[error("The resource scope is closed")]
    Closed,
}

/// The primary error type of the `client` service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the ports.
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Represents an error from the underlying HTTP library.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Represents a standard Input/Output error (e.g. writing a download).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
