//! In-memory record store with fault injection.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{Filter, Record, RecordStore};

/// Injected faults, checked on every call.
#[derive(Debug, Default)]
struct FaultPlan {
    /// Tables whose every call fails
    failing_tables: HashSet<String>,

    /// Record ids whose updates fail
    failing_records: HashSet<String>,

    /// Artificial latency per call
    latency: Duration,
}

/// In-memory `RecordStore` used as the substitutable fake.
///
/// Each table is an insertion-ordered `Vec`, guarded by one mutex, so every
/// call is atomic with respect to every other call.
///
/// Faults are controllable the same way a simulated network is:
/// - `fail_next(n)`: the next `n` calls return `Unavailable` (transient)
/// - `fail_table(t)`: every call on `t` fails until `heal_all()`
/// - `fail_updates_for(id)`: updates touching record `id` fail
/// - `set_latency(d)`: every call sleeps `d` first
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    faults: Mutex<FaultPlan>,
    fail_next: AtomicU32,
    calls: AtomicU64,
    updates: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            faults: Mutex::new(FaultPlan::default()),
            fail_next: AtomicU32::new(0),
            calls: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        }
    }

    /// Creates an Arc-wrapped store for sharing across components.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Makes every call against `table` fail until healed.
    pub fn fail_table(&self, table: &str) {
        self.faults().failing_tables.insert(table.to_string());
    }

    /// Makes every update that matches record `id` fail until healed.
    pub fn fail_updates_for(&self, id: &str) {
        self.faults().failing_records.insert(id.to_string());
    }

    /// Sets artificial latency for every call.
    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = latency;
    }

    /// Clears all injected faults.
    pub fn heal_all(&self) {
        *self.faults() = FaultPlan::default();
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// Total calls received (including failed ones).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total records modified by successful updates.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Returns a copy of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables().get(table).cloned().unwrap_or_default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Record>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, FaultPlan> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies latency and call-level faults shared by all operations.
    async fn admit(&self, table: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.faults().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::unavailable("injected transient failure"));
        }

        if self.faults().failing_tables.contains(table) {
            return Err(StoreError::unavailable(format!("table {} is failing", table)));
        }

        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.admit(table).await?;

        let tables = self.tables();
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, mut record: Record) -> Result<Record, StoreError> {
        self.admit(table).await?;

        let id = match record_id(&record) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut tables = self.tables();
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| record_id(r) == Some(id.as_str())) {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                id,
            });
        }

        rows.push(record.clone());
        Ok(record)
    }

    async fn update(&self, table: &str, fields: Record, filter: &Filter) -> Result<usize, StoreError> {
        self.admit(table).await?;

        let mut tables = self.tables();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };

        {
            let faults = self.faults();
            let blocked = rows
                .iter()
                .filter(|r| filter.matches(r))
                .filter_map(record_id)
                .find(|id| faults.failing_records.contains(*id));
            if let Some(id) = blocked {
                return Err(StoreError::unavailable(format!("record {} is failing", id)));
            }
        }

        let mut touched = 0;
        for row in rows.iter_mut().filter(|r| filter.matches(r)) {
            for (key, value) in &fields {
                row.insert(key.clone(), value.clone());
            }
            touched += 1;
        }

        self.updates.fetch_add(touched as u64, Ordering::SeqCst);
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_rejects_duplicates() {
        let store = MemoryStore::new();

        let stored = store.insert("sensors", record(json!({"type": "flow"}))).await.unwrap();
        let id = stored.get("id").and_then(Value::as_str).unwrap().to_string();
        assert!(!id.is_empty());

        let dup = store.insert("sensors", record(json!({"id": id, "type": "flow"}))).await;
        assert!(matches!(dup, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_query_preserves_insertion_order() {
        let store = MemoryStore::new();
        for id in ["S3", "S1", "S2"] {
            store.insert("sensors", record(json!({"id": id, "asset_id": "E1"}))).await.unwrap();
        }

        let rows = store.query("sensors", &Filter::eq("asset_id", "E1")).await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(record_id).collect();
        assert_eq!(ids, vec!["S3", "S1", "S2"]);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store.insert("sensors", record(json!({"id": "S1", "value": 1.0, "unit": "psi"}))).await.unwrap();

        let n = store
            .update("sensors", record(json!({"value": 2.0, "last_seen": 10})), &Filter::eq("id", "S1"))
            .await
            .unwrap();
        assert_eq!(n, 1);

        let row = &store.rows("sensors")[0];
        assert_eq!(row.get("value"), Some(&json!(2.0)));
        assert_eq!(row.get("last_seen"), Some(&json!(10)));
        assert_eq!(row.get("unit"), Some(&json!("psi")));
    }

    #[tokio::test]
    async fn test_fail_next_is_transient() {
        let store = MemoryStore::new();
        store.fail_next(2);

        assert!(store.query("nodes", &Filter::All).await.is_err());
        assert!(store.query("nodes", &Filter::All).await.is_err());
        assert!(store.query("nodes", &Filter::All).await.is_ok());
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_record_blocks_update_only() {
        let store = MemoryStore::new();
        store.insert("sensors", record(json!({"id": "S1", "value": 1.0}))).await.unwrap();
        store.fail_updates_for("S1");

        let err = store
            .update("sensors", record(json!({"value": 5.0})), &Filter::eq("id", "S1"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.rows("sensors")[0].get("value"), Some(&json!(1.0)));

        store.heal_all();
        let n = store
            .update("sensors", record(json!({"value": 5.0})), &Filter::eq("id", "S1"))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
