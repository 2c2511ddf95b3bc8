//! Record store abstraction for the persistence collaborator.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A single row as the store sees it: a JSON object.
pub type Record = Map<String, Value>;

/// Row predicate for `query` and `update`.
///
/// Only equality and conjunction are needed by the engine; richer predicates
/// belong to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record
    All,

    /// Field equals value
    Eq(String, Value),

    /// All sub-filters match
    And(Vec<Filter>),
}

impl Filter {
    /// Shorthand for `Filter::Eq`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Combines two filters with AND.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All => other,
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Evaluates the predicate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => record.get(field) == Some(value),
            Filter::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }

    /// Returns the value an `id` equality pins, if any.
    ///
    /// Backends with a primary-key index use this to avoid a scan.
    pub fn pinned_id(&self) -> Option<&str> {
        match self {
            Filter::Eq(field, Value::String(id)) if field == "id" => Some(id),
            Filter::And(parts) => parts.iter().find_map(|p| p.pinned_id()),
            _ => None,
        }
    }
}

/// Abstraction for the external key/record store.
///
/// # Implementations
///
/// - **Production**: `SledRecordStore` (aware_core) - embedded database
/// - **Testing/Simulation**: `MemoryStore` - in-memory with fault injection
///
/// # Guarantees expected by the engine
///
/// - `update` applies the full field set to each matched record atomically:
///   a concurrent `query` sees either all new fields or none of them.
/// - Records come back from `query` in insertion order.
/// - No multi-row transactions are assumed.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Returns all records in `table` matching `filter`.
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Inserts a record and returns it as stored.
    ///
    /// A record without an `id` gets a store-assigned one.
    ///
    /// # Returns
    /// * `Err(StoreError::DuplicateKey)` - a record with the same id exists
    async fn insert(&self, table: &str, record: Record) -> Result<Record, StoreError>;

    /// Merges `fields` into every record matching `filter`.
    ///
    /// # Returns
    /// Number of records updated (0 when nothing matched).
    async fn update(&self, table: &str, fields: Record, filter: &Filter) -> Result<usize, StoreError>;
}
