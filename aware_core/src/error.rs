//! Error taxonomy for the telemetry engine.

use aware_env::StoreError;
use thiserror::Error;

use crate::model::AssetType;

/// Errors surfaced by engine operations.
///
/// `InsufficientData` is deliberately absent: a detector that cannot
/// evaluate returns a verdict, not an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Ambiguous reference: name {name:?} matches {count} edges")]
    AmbiguousReference { name: String, count: usize },

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Malformed {table} record: {reason}")]
    MalformedRecord { table: &'static str, reason: String },

    #[error("Dangling reference: {from} points at missing {asset_type} {asset_id}")]
    DanglingReference {
        from: String,
        asset_type: AssetType,
        asset_id: String,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl TelemetryError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    pub fn malformed(table: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedRecord {
            table,
            reason: reason.to_string(),
        }
    }

    /// Stable snake_case tag for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousReference { .. } => "ambiguous_reference",
            Self::StoreFailure(_) => "store_failure",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::MalformedRecord { .. } => "malformed_record",
            Self::DanglingReference { .. } => "dangling_reference",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<StoreError> for TelemetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { table, id } => Self::DuplicateKey(format!("{}/{}", table, id)),
            other => Self::StoreFailure(other.to_string()),
        }
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
