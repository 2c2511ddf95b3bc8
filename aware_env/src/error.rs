//! Error types for the persistence collaborator.

use thiserror::Error;

/// Errors reported by a `RecordStore` implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Backend could not be reached (connection refused, pool exhausted, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Call did not complete in time
    #[error("Store call timed out after {0}ms")]
    Timeout(u64),

    /// Insert collided with an existing record id
    #[error("Duplicate key in table {table}: {id}")]
    DuplicateKey { table: String, id: String },

    /// Record could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a backend error.
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }

    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
