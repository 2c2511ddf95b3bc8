//! SensorStore - typed access to sensor rows in the record store.

use aware_env::{Filter, Record, RecordStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, TelemetryError};
use crate::model::{tables, AssetType, Entity, Sensor};
use crate::retry::with_retry;
use crate::topology::{AssetIndex, TopologyGraph};

/// The two fields a reading mutation changes.
///
/// They are always written together in one store update, so no reader can
/// observe a value paired with another write's timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorUpdate {
    pub value: Option<f64>,
    pub last_seen: u64,
}

impl SensorUpdate {
    fn to_fields(self) -> Record {
        let mut fields = Record::new();
        fields.insert("value".to_string(), json!(self.value));
        fields.insert("last_seen".to_string(), json!(self.last_seen));
        fields
    }
}

/// One sensor that an operation could not use or write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorFailure {
    pub sensor_id: String,
    pub asset_id: String,
    /// `TelemetryError::kind` of the cause
    pub kind: String,
    pub error: String,
}

impl SensorFailure {
    pub fn new(sensor_id: &str, asset_id: &str, error: &TelemetryError) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            asset_id: asset_id.to_string(),
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

/// Sensor rows read in one query, split into usable sensors and rows that
/// were rejected one by one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorScan {
    pub sensors: Vec<Sensor>,
    pub rejected: Vec<SensorFailure>,
}

impl SensorScan {
    /// Moves sensors whose asset does not resolve (or resolves to the other
    /// asset type) into `rejected` as `DanglingReference` failures.
    pub fn reject_dangling(mut self, index: &AssetIndex) -> Self {
        let mut live = Vec::with_capacity(self.sensors.len());
        for sensor in self.sensors {
            match dangling(&sensor, index) {
                Some(err) => {
                    warn!("{}", err);
                    self.rejected.push(SensorFailure::new(&sensor.id, &sensor.asset_id, &err));
                }
                None => live.push(sensor),
            }
        }
        self.sensors = live;
        self
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Current sensor readings, mediated through the persistence collaborator.
pub struct SensorStore<St: RecordStore> {
    store: Arc<St>,
    retry: RetryPolicy,
}

impl<St: RecordStore> SensorStore<St> {
    pub fn new(store: Arc<St>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Full snapshot of every sensor, in insertion order. Malformed rows are
    /// skipped; use `scan_all` to see them.
    pub async fn list_all(&self) -> Result<Vec<Sensor>> {
        Ok(self.scan_all().await?.sensors)
    }

    /// All sensors mounted on `asset_id`, in insertion order.
    ///
    /// An unknown asset yields an empty list; use `TopologyGraph` when the
    /// asset must exist.
    pub async fn list_by_asset(&self, asset_id: &str) -> Result<Vec<Sensor>> {
        Ok(self.scan_by_asset(asset_id).await?.sensors)
    }

    /// Every sensor row, decoded one at a time. A malformed row lands in
    /// `rejected` and does not fail its siblings.
    ///
    /// # Returns
    /// * `Err(StoreFailure)` - the query itself failed after retries
    pub async fn scan_all(&self) -> Result<SensorScan> {
        self.scan(&Filter::All, "list sensors").await
    }

    pub async fn scan_by_asset(&self, asset_id: &str) -> Result<SensorScan> {
        self.scan(&Filter::eq("asset_id", asset_id), "list sensors by asset")
            .await
    }

    /// A single sensor by id.
    ///
    /// # Returns
    /// * `Err(NotFound)` - no sensor with that id
    /// * `Err(MalformedRecord)` - the stored row does not decode
    pub async fn get(&self, sensor_id: &str) -> Result<Sensor> {
        let filter = Filter::eq("id", sensor_id);
        let records = with_retry(&self.retry, "get sensor", || self.store.query(tables::SENSORS, &filter)).await?;
        match records.first() {
            Some(record) => decode_stored(record),
            None => Err(TelemetryError::not_found("sensor", sensor_id)),
        }
    }

    /// Writes a new reading atomically.
    ///
    /// # Returns
    /// * `Err(NotFound)` - no sensor with that id
    /// * `Err(StoreFailure)` - the store failed after retries
    pub async fn write(&self, sensor_id: &str, update: SensorUpdate) -> Result<()> {
        if let Some(v) = update.value {
            if !v.is_finite() {
                return Err(TelemetryError::malformed(tables::SENSORS, format!("value {} is not finite", v)));
            }
        }

        let filter = Filter::eq("id", sensor_id);
        let fields = update.to_fields();
        let touched = with_retry(&self.retry, "write sensor", || {
            self.store.update(tables::SENSORS, fields.clone(), &filter)
        })
        .await?;

        if touched == 0 {
            return Err(TelemetryError::not_found("sensor", sensor_id));
        }
        debug!("sensor {} <- {:?} @ {}", sensor_id, update.value, update.last_seen);
        Ok(())
    }

    /// Inserts a new sensor and returns it as stored (with its id).
    ///
    /// # Returns
    /// * `Err(DuplicateKey)` - a sensor with the same id exists
    /// * `Err(MalformedRecord)` - the sensor fails validation
    pub async fn insert(&self, sensor: Sensor) -> Result<Sensor> {
        sensor
            .check()
            .map_err(|reason| TelemetryError::malformed(tables::SENSORS, reason))?;
        let record = sensor.to_record()?;

        let stored = with_retry(&self.retry, "insert sensor", || {
            self.store.insert(tables::SENSORS, record.clone())
        })
        .await?;
        decode_stored(&stored)
    }

    /// Checks that every sensor row decodes and its asset reference
    /// resolves.
    ///
    /// Returns the number of sensors checked, or the first
    /// `MalformedRecord` / `DanglingReference` found.
    pub async fn verify_integrity(&self, topology: &TopologyGraph<St>) -> Result<usize> {
        let scan = self.scan_all().await?;
        if let Some(bad) = scan.rejected.first() {
            return Err(TelemetryError::malformed(
                tables::SENSORS,
                format!("row {:?} does not decode", bad.sensor_id),
            ));
        }

        let index = topology.asset_index().await?;
        match scan.sensors.iter().find_map(|s| dangling(s, &index)) {
            Some(err) => Err(err),
            None => Ok(scan.sensors.len()),
        }
    }

    async fn scan(&self, filter: &Filter, what: &str) -> Result<SensorScan> {
        let records = with_retry(&self.retry, what, || self.store.query(tables::SENSORS, filter)).await?;

        let mut scan = SensorScan::default();
        for record in &records {
            match decode_stored(record) {
                Ok(sensor) => scan.sensors.push(sensor),
                Err(e) => {
                    let sensor_id = field(record, "id");
                    let asset_id = field(record, "asset_id");
                    warn!("{}: skipping sensor row {:?}: {}", what, sensor_id, e);
                    scan.rejected.push(SensorFailure::new(sensor_id, asset_id, &e));
                }
            }
        }
        Ok(scan)
    }
}

/// `DanglingReference` when the sensor's asset is missing or of the other type.
fn dangling(sensor: &Sensor, index: &AssetIndex) -> Option<TelemetryError> {
    let known = match sensor.asset_type {
        AssetType::Node => index.nodes.contains_key(&sensor.asset_id),
        AssetType::Edge => index.edges.contains_key(&sensor.asset_id),
    };
    if known {
        return None;
    }
    Some(TelemetryError::DanglingReference {
        from: format!("sensor {}", sensor.id),
        asset_type: sensor.asset_type,
        asset_id: sensor.asset_id.clone(),
    })
}

fn field<'a>(record: &'a Record, name: &str) -> &'a str {
    record.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn require_id(sensor: &Sensor) -> Result<()> {
    if sensor.id.is_empty() {
        return Err(TelemetryError::malformed(tables::SENSORS, "stored sensor has no id"));
    }
    Ok(())
}

fn decode_stored(record: &Record) -> Result<Sensor> {
    let sensor = Sensor::from_record(record)?;
    require_id(&sensor)?;
    Ok(sensor)
}

/// Groups sensors by asset id, keeping first-seen asset order and the
/// insertion order of sensors within each asset.
pub fn group_by_asset_ordered(sensors: &[Sensor]) -> Vec<(String, Vec<&Sensor>)> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Sensor>)> = Vec::new();
    for sensor in sensors {
        match slots.get(sensor.asset_id.as_str()) {
            Some(&slot) => groups[slot].1.push(sensor),
            None => {
                slots.insert(sensor.asset_id.as_str(), groups.len());
                groups.push((sensor.asset_id.clone(), vec![sensor]));
            }
        }
    }
    groups
}
