//! Error types for the remote store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a [`RemoteStore`](super::RemoteStore) call.
///
/// `is_retryable()` splits transient trouble (throttling, 5xx, dropped
/// connections) from conditions another attempt cannot fix.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied for {key}: {message}")]
    Denied { key: String, message: String },

    #[error("Transient storage error for {key}: {message}")]
    Transient { key: String, message: String },

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Unsupported storage operation: {0}")]
    Unsupported(String),

    /// The local file could not be read while it was being sent.
    #[error("Failed to read {}: {source}", path.display())]
    LocalRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

impl StoreError {
    /// Classify an `object_store` error for the given key.
    pub(crate) fn from_object_store(key: &str, err: object_store::Error) -> Self {
        use object_store::Error as E;
        match err {
            E::NotFound { .. } => StoreError::NotFound(key.to_string()),
            E::PermissionDenied { .. } | E::Unauthenticated { .. } => StoreError::Denied {
                key: key.to_string(),
                message: err.to_string(),
            },
            E::UnknownConfigurationKey { .. } | E::InvalidPath { .. } => {
                StoreError::Config(err.to_string())
            }
            E::NotSupported { .. } | E::NotImplemented { .. } => {
                StoreError::Unsupported(err.to_string())
            }
            // Generic covers network failures, throttling and 5xx responses
            // that survived the client's own retries.
            other => StoreError::Transient {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }
}
