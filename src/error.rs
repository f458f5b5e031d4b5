//! Error types shared by the store, the feed and the controller
//!
//! Three kinds of failure matter to the catalog:
//! - network failures, which the sync layer turns into a cache fallback
//! - storage failures, which always reach the caller
//! - unknown ids on a favorite toggle

use thiserror::Error;

/// Failure while fetching a page from the remote listing.
///
/// The variants only exist for logging; every one of them is handled the
/// same way (fall back to the cache).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Connection refused, DNS failure, reset, ...
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The body was not a JSON array of photos
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout
        } else if let Some(status) = err.status() {
            NetworkError::Status(status.as_u16())
        } else if err.is_decode() {
            NetworkError::Decode(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The local store could not complete an operation.
    /// Never retried and never swallowed.
    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable {
        operation: &'static str,
        message: String,
    },

    /// Favorite toggle on an id the store has never seen
    #[error("photo not found: {id}")]
    NotFound { id: String },

    /// The controller was disposed before or during the operation
    #[error("catalog controller has been disposed")]
    Disposed,
}

impl CatalogError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        CatalogError::StorageUnavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        CatalogError::NotFound { id: id.into() }
    }

    /// True for the failures that must halt the affected operation visibly
    pub fn is_storage(&self) -> bool {
        matches!(self, CatalogError::StorageUnavailable { .. })
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::storage("sqlite", err.to_string())
    }
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(err: tokio::task::JoinError) -> Self {
        CatalogError::storage("blocking task", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
