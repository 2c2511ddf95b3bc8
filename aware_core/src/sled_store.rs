//! Sled-backed `RecordStore`.
//!
//! Each table is a sled tree keyed by an 8-byte big-endian sequence number,
//! so iteration order is insertion order. A companion `<table>.by_id` tree
//! maps record ids to sequence keys for id-pinned queries and duplicate
//! checks. Values are JSON.

use async_trait::async_trait;
use aware_env::{Filter, Record, RecordStore, StoreError};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Persistent record store on an embedded sled database.
pub struct SledRecordStore {
    db: sled::Db,
    /// Serializes read-modify-write cycles (insert, update)
    writes: Mutex<()>,
}

fn backend(e: sled::Error) -> StoreError {
    StoreError::backend(e.to_string())
}

impl SledRecordStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::backend(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self::from_db(db))
    }

    /// Create a temporary store, removed on drop
    pub fn open_temp() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::backend(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            writes: Mutex::new(()),
        }
    }

    fn trees(&self, table: &str) -> Result<(sled::Tree, sled::Tree), StoreError> {
        let rows = self.db.open_tree(table).map_err(backend)?;
        let ids = self.db.open_tree(format!("{}.by_id", table)).map_err(backend)?;
        Ok((rows, ids))
    }

    /// Matching rows with their sequence keys, in insertion order.
    fn scan(&self, table: &str, filter: &Filter) -> Result<Vec<(sled::IVec, Record)>, StoreError> {
        let (rows, ids) = self.trees(table)?;

        if let Some(id) = filter.pinned_id() {
            let Some(key) = ids.get(id.as_bytes()).map_err(backend)? else {
                return Ok(Vec::new());
            };
            let Some(bytes) = rows.get(&key).map_err(backend)? else {
                return Ok(Vec::new());
            };
            let record = decode(&bytes)?;
            return Ok(if filter.matches(&record) {
                vec![(key, record)]
            } else {
                Vec::new()
            });
        }

        let mut matched = Vec::new();
        for entry in rows.iter() {
            let (key, bytes) = entry.map_err(backend)?;
            let record = decode(&bytes)?;
            if filter.matches(&record) {
                matched.push((key, record));
            }
        }
        Ok(matched)
    }
}

fn decode(bytes: &[u8]) -> Result<Record, StoreError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Serialization(format!("stored value is not an object: {}", other))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

fn encode(record: &Record) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self.scan(table, filter)?.into_iter().map(|(_, record)| record).collect())
    }

    async fn insert(&self, table: &str, mut record: Record) -> Result<Record, StoreError> {
        let _w = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        let (rows, ids) = self.trees(table)?;

        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        if ids.contains_key(id.as_bytes()).map_err(backend)? {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                id,
            });
        }

        let seq = self.db.generate_id().map_err(backend)?.to_be_bytes();
        rows.insert(seq, encode(&record)?).map_err(backend)?;
        ids.insert(id.as_bytes(), &seq[..]).map_err(backend)?;
        self.db.flush().map_err(backend)?;
        Ok(record)
    }

    async fn update(&self, table: &str, fields: Record, filter: &Filter) -> Result<usize, StoreError> {
        let _w = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        let (rows, _) = self.trees(table)?;

        let matched = self.scan(table, filter)?;
        for (key, mut record) in matched.iter().cloned() {
            for (field, value) in &fields {
                record.insert(field.clone(), value.clone());
            }
            // One value per row: readers see the whole merged record or none of it.
            rows.insert(key, encode(&record)?).map_err(backend)?;
        }
        if !matched.is_empty() {
            self.db.flush().map_err(backend)?;
        }
        Ok(matched.len())
    }
}
