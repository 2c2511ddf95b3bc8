//! Typed network entities and their store-boundary validation.
//!
//! Records arrive from the store as loose JSON objects. They are turned into
//! `Node`, `Edge` and `Sensor` here, and anything that does not fit is
//! rejected with `MalformedRecord` before it can reach detection logic.

use aware_env::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AlertLimits, BaselineConfig, JitterConfig};
use crate::error::{Result, TelemetryError};

/// Store table names.
pub mod tables {
    pub const NODES: &str = "nodes";
    pub const EDGES: &str = "edges";
    pub const SENSORS: &str = "sensors";
}

/// Which kind of asset a sensor is mounted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Node,
    Edge,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Node => "node",
            AssetType::Edge => "edge",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            AssetType::Node => tables::NODES,
            AssetType::Edge => tables::EDGES,
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of sensor kinds the engine has rules for.
///
/// Anything else is carried through as `Other` and left untouched by jitter
/// and reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorKind {
    Pressure,
    Flow,
    Acoustic,
    Other(String),
}

impl SensorKind {
    pub fn as_str(&self) -> &str {
        match self {
            SensorKind::Pressure => "pressure",
            SensorKind::Flow => "flow",
            SensorKind::Acoustic => "acoustic",
            SensorKind::Other(name) => name.as_str(),
        }
    }

    /// Half-width of the organic jitter band; `None` means no jitter.
    pub fn jitter_bound(&self, jitter: &JitterConfig) -> Option<f64> {
        match self {
            SensorKind::Pressure => Some(jitter.pressure),
            SensorKind::Flow => Some(jitter.flow),
            SensorKind::Acoustic => Some(jitter.acoustic),
            SensorKind::Other(_) => None,
        }
    }

    /// Deterministic reset value; `None` means the value is left as is.
    pub fn baseline(&self, baseline: &BaselineConfig) -> Option<f64> {
        match self {
            SensorKind::Pressure => Some(baseline.pressure),
            SensorKind::Flow => Some(baseline.flow),
            SensorKind::Acoustic => Some(baseline.acoustic),
            SensorKind::Other(_) => None,
        }
    }

    /// Smallest physically plausible value.
    pub fn lower_bound(&self) -> Option<f64> {
        match self {
            SensorKind::Pressure | SensorKind::Flow | SensorKind::Acoustic => Some(0.0),
            SensorKind::Other(_) => None,
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorKind::Pressure => "psi",
            SensorKind::Flow => "L/s",
            SensorKind::Acoustic => "dB",
            SensorKind::Other(_) => "",
        }
    }

    /// Clamps a candidate value into the kind's physical range.
    pub fn clamp(&self, value: f64) -> f64 {
        match self.lower_bound() {
            Some(floor) => value.max(floor),
            None => value,
        }
    }
}

impl From<String> for SensorKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pressure" => SensorKind::Pressure,
            "flow" => SensorKind::Flow,
            "acoustic" => SensorKind::Acoustic,
            _ => SensorKind::Other(s),
        }
    }
}

impl From<&str> for SensorKind {
    fn from(s: &str) -> Self {
        SensorKind::from(s.to_string())
    }
}

impl From<SensorKind> for String {
    fn from(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A junction, tank, source, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A pipe between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub name: String,
    pub from_node: String,
    pub to_node: String,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub diameter: Option<f64>,
}

/// A sensor and its current reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Empty until the store assigns one on insert
    #[serde(default)]
    pub id: String,
    pub asset_id: String,
    pub asset_type: AssetType,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    /// `None` means no reading is available
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub last_seen: u64,
}

impl Sensor {
    /// A sensor about to be provisioned; the store assigns its id.
    pub fn provision(
        asset_id: impl Into<String>,
        asset_type: AssetType,
        kind: SensorKind,
        value: Option<f64>,
        last_seen: u64,
    ) -> Self {
        let unit = kind.default_unit().to_string();
        Self {
            id: String::new(),
            asset_id: asset_id.into(),
            asset_type,
            kind,
            value,
            unit,
            last_seen,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Conversion between typed entities and store records.
pub trait Entity: Serialize + DeserializeOwned + Sized {
    const TABLE: &'static str;

    /// Domain checks serde cannot express.
    fn check(&self) -> std::result::Result<(), String>;

    /// Decodes and validates a record.
    fn from_record(record: &Record) -> Result<Self> {
        let entity: Self = serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| TelemetryError::malformed(Self::TABLE, e))?;
        entity
            .check()
            .map_err(|reason| TelemetryError::malformed(Self::TABLE, reason))?;
        Ok(entity)
    }

    /// Encodes the entity; an empty `id` is omitted so the store assigns one.
    fn to_record(&self) -> Result<Record> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                if map.get("id").and_then(Value::as_str) == Some("") {
                    map.remove("id");
                }
                Ok(map)
            }
            Ok(other) => Err(TelemetryError::malformed(Self::TABLE, format!("encoded as {}", other))),
            Err(e) => Err(TelemetryError::malformed(Self::TABLE, e)),
        }
    }
}

fn require(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} must not be empty", field))
    } else {
        Ok(())
    }
}

impl Entity for Node {
    const TABLE: &'static str = tables::NODES;

    fn check(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} out of range", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} out of range", self.longitude));
        }
        Ok(())
    }
}

impl Entity for Edge {
    const TABLE: &'static str = tables::EDGES;

    fn check(&self) -> std::result::Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        require("from_node", &self.from_node)?;
        require("to_node", &self.to_node)?;
        if let Some(d) = self.diameter {
            if !d.is_finite() || d <= 0.0 {
                return Err(format!("diameter {} must be positive", d));
            }
        }
        Ok(())
    }
}

impl Entity for Sensor {
    const TABLE: &'static str = tables::SENSORS;

    fn check(&self) -> std::result::Result<(), String> {
        require("asset_id", &self.asset_id)?;
        if self.kind.as_str().is_empty() {
            return Err("type must not be empty".to_string());
        }
        if let Some(v) = self.value {
            if !v.is_finite() {
                return Err(format!("value {} is not finite", v));
            }
            if let Some(floor) = self.kind.lower_bound() {
                if v < floor {
                    return Err(format!("{} value {} below physical bound {}", self.kind, v, floor));
                }
            }
        }
        Ok(())
    }
}

/// Decodes a batch of records, failing on the first malformed one.
pub fn decode_all<T: Entity>(records: &[Record]) -> Result<Vec<T>> {
    records.iter().map(T::from_record).collect()
}

/// A resolved asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "asset_type", rename_all = "lowercase")]
pub enum Asset {
    Node(Node),
    Edge(Edge),
}

impl Asset {
    pub fn id(&self) -> &str {
        match self {
            Asset::Node(n) => &n.id,
            Asset::Edge(e) => &e.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Asset::Node(n) => &n.name,
            Asset::Edge(e) => &e.name,
        }
    }

    pub fn asset_type(&self) -> AssetType {
        match self {
            Asset::Node(_) => AssetType::Node,
            Asset::Edge(_) => AssetType::Edge,
        }
    }
}

/// Dashboard classification of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Normal,
    Alert,
    NoReading,
}

impl ReadingStatus {
    pub fn classify(sensor: &Sensor, limits: &AlertLimits) -> Self {
        let Some(value) = sensor.value else {
            return ReadingStatus::NoReading;
        };
        let alert = match sensor.kind {
            SensorKind::Pressure => value < limits.pressure_below,
            SensorKind::Acoustic => value > limits.acoustic_above,
            SensorKind::Flow => value > limits.flow_above,
            SensorKind::Other(_) => false,
        };
        if alert {
            ReadingStatus::Alert
        } else {
            ReadingStatus::Normal
        }
    }
}

/// Severity bucket of a detected leak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl LeakSeverity {
    pub fn from_confidence(confidence: f64) -> Self {
        match confidence {
            c if c < 0.25 => LeakSeverity::Low,
            c if c < 0.5 => LeakSeverity::Medium,
            c if c < 0.75 => LeakSeverity::High,
            _ => LeakSeverity::Critical,
        }
    }
}

/// A detected leak, handed to whoever persists events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakEvent {
    pub asset_ref: String,
    pub asset_type: AssetType,
    pub severity: LeakSeverity,
    pub confidence: f64,
    pub detected_by: String,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_sensor_from_record() {
        let sensor = Sensor::from_record(&record(json!({
            "id": "S1", "type": "pressure", "value": 75.5,
            "asset_type": "edge", "asset_id": "E1", "unit": "psi", "last_seen": 10
        })))
        .unwrap();

        assert_eq!(sensor.kind, SensorKind::Pressure);
        assert_eq!(sensor.asset_type, AssetType::Edge);
        assert_eq!(sensor.value, Some(75.5));
    }

    #[test]
    fn test_sensor_null_value_and_unknown_kind() {
        let sensor = Sensor::from_record(&record(json!({
            "id": "S9", "type": "turbidity", "value": null,
            "asset_type": "node", "asset_id": "N1"
        })))
        .unwrap();

        assert_eq!(sensor.kind, SensorKind::Other("turbidity".to_string()));
        assert_eq!(sensor.value, None);
        assert_eq!(sensor.last_seen, 0);
    }

    #[test]
    fn test_malformed_sensor_rejected() {
        let bad_type = Sensor::from_record(&record(json!({
            "id": "S1", "type": "pressure", "value": 1.0, "asset_type": "valve", "asset_id": "E1"
        })));
        assert!(matches!(bad_type, Err(TelemetryError::MalformedRecord { table: "sensors", .. })));

        let negative = Sensor::from_record(&record(json!({
            "id": "S1", "type": "flow", "value": -3.0, "asset_type": "edge", "asset_id": "E1"
        })));
        assert!(negative.is_err());

        let missing_asset = Sensor::from_record(&record(json!({
            "id": "S1", "type": "flow", "value": 3.0, "asset_type": "edge"
        })));
        assert!(missing_asset.is_err());
    }

    #[test]
    fn test_to_record_omits_empty_id() {
        let sensor = Sensor::provision("E1", AssetType::Edge, SensorKind::Acoustic, Some(2.5), 0);
        let rec = sensor.to_record().unwrap();

        assert!(!rec.contains_key("id"));
        assert_eq!(rec.get("type"), Some(&json!("acoustic")));
        assert_eq!(rec.get("unit"), Some(&json!("dB")));
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let edge = Edge::from_record(&record(json!({
            "id": "E1", "name": "P1", "from_node": "", "to_node": "N2"
        })));
        assert!(edge.is_err());
    }

    #[test]
    fn test_reading_status() {
        let limits = AlertLimits::default();
        let mut s = Sensor::provision("E1", AssetType::Edge, SensorKind::Pressure, Some(50.0), 0);
        assert_eq!(ReadingStatus::classify(&s, &limits), ReadingStatus::Alert);

        s.value = Some(62.0);
        assert_eq!(ReadingStatus::classify(&s, &limits), ReadingStatus::Normal);

        s.value = None;
        assert_eq!(ReadingStatus::classify(&s, &limits), ReadingStatus::NoReading);
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(LeakSeverity::from_confidence(0.1), LeakSeverity::Low);
        assert_eq!(LeakSeverity::from_confidence(0.3), LeakSeverity::Medium);
        assert_eq!(LeakSeverity::from_confidence(0.6), LeakSeverity::High);
        assert_eq!(LeakSeverity::from_confidence(0.9), LeakSeverity::Critical);
    }
}
