//! Shared fixtures for unit tests.

use async_trait::async_trait;
use aware_env::{MemoryStore, Record, RecordStore, TelemetryContext};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::model::tables;

/// Context with a hand-driven clock and a fixed position in every jitter band.
///
/// `pick` of 0.0 always draws `low`, 1.0 always draws `high`.
pub struct FixedContext {
    clock_ms: AtomicU64,
    pick: f64,
}

impl FixedContext {
    pub fn new(start_ms: u64, pick: f64) -> Arc<Self> {
        Arc::new(Self {
            clock_ms: AtomicU64::new(start_ms),
            pick,
        })
    }

    pub fn set_ms(&self, ms: u64) {
        self.clock_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TelemetryContext for FixedContext {
    fn now(&self) -> Duration {
        Duration::from_millis(self.clock_ms.load(Ordering::SeqCst))
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.now()
    }

    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        if !(high > low) {
            return low;
        }
        low + (high - low) * self.pick
    }

    fn seed(&self) -> u64 {
        0
    }
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

/// A sensor row as the store would hold it. Ids starting with `N` are nodes.
pub fn sensor_row(id: &str, asset_id: &str, kind: &str, value: Option<f64>) -> Record {
    let asset_type = if asset_id.starts_with('N') { "node" } else { "edge" };
    record(json!({
        "id": id,
        "asset_id": asset_id,
        "asset_type": asset_type,
        "type": kind,
        "value": value,
        "unit": "",
        "last_seen": 1_000u64,
    }))
}

/// Three nodes, two pipes and six sensors:
///
/// - `E1` ("P1", N1 -> N2): pressure 75.5, flow 90, acoustic 2.0
/// - `E2` ("P2", N2 -> N3): pressure 65, flow null (no acoustic sensor)
/// - `N1`: one turbidity sensor
pub async fn seed_store() -> Arc<MemoryStore> {
    let store = MemoryStore::shared();

    let nodes = [
        json!({"id": "N1", "name": "Reservoir", "type": "source", "latitude": 40.0, "longitude": -74.0}),
        json!({"id": "N2", "name": "Junction A", "type": "junction", "latitude": 40.01, "longitude": -74.01}),
        json!({"id": "N3", "name": "Tank 1", "type": "tank", "latitude": 40.02, "longitude": -74.02}),
    ];
    for node in nodes {
        store.insert(tables::NODES, record(node)).await.unwrap();
    }

    let edges = [
        json!({"id": "E1", "name": "P1", "from_node": "N1", "to_node": "N2", "material": "PVC", "diameter": 300.0}),
        json!({"id": "E2", "name": "P2", "from_node": "N2", "to_node": "N3", "material": "ductile iron", "diameter": 200.0}),
    ];
    for edge in edges {
        store.insert(tables::EDGES, record(edge)).await.unwrap();
    }

    let sensors = [
        sensor_row("S1", "E1", "pressure", Some(75.5)),
        sensor_row("S2", "E1", "flow", Some(90.0)),
        sensor_row("S3", "E1", "acoustic", Some(2.0)),
        sensor_row("S4", "E2", "pressure", Some(65.0)),
        sensor_row("S5", "E2", "flow", None),
        sensor_row("S6", "N1", "turbidity", Some(1.2)),
    ];
    for sensor in sensors {
        store.insert(tables::SENSORS, sensor).await.unwrap();
    }

    store
}
