//! Error types for the TokenForge read cache.
//!
//! Backend errors travel through the cache layer untouched: whatever the
//! document store reports is what the caller sees once retries run out.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the TokenForge cache.
#[derive(Debug, Error)]
pub enum ForgeError {
    // Remote document store errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Permission denied for {path}")]
    PermissionDenied { path: String },

    // Realtime subscription errors
    #[error("Failed to set up subscription for {key}: {message}")]
    SubscriptionSetup { key: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        ForgeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ForgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ForgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error came from the remote document store.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ForgeError::Backend { .. }
                | ForgeError::Unavailable { .. }
                | ForgeError::PermissionDenied { .. }
        )
    }
}
