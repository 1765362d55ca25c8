//! Errors from server-side value stores.

use enrich_kernel::{CallbackError, EnrichError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("duplicate backend uid: {0}")]
    DuplicateBackend(String),

    #[error("malformed server-side reference: {0}")]
    MalformedReference(String),
}

impl From<StoreError> for EnrichError {
    fn from(err: StoreError) -> Self {
        EnrichError::Store(err.to_string())
    }
}

impl From<StoreError> for CallbackError {
    fn from(err: StoreError) -> Self {
        CallbackError::Store(err.to_string())
    }
}
