//! AWARE Core - Sensor Telemetry and Leak-Detection Engine
//!
//! Models a water-distribution network as nodes (junctions, tanks, sources)
//! and edges (pipes) carrying pressure, flow and acoustic sensors:
//! 1. **Readings**: typed sensor state behind a generic record store
//! 2. **Simulation**: bounded jitter, reset-to-baseline and leak injection,
//!    serialized per asset
//! 3. **Detection**: a deterministic low-pressure / high-acoustic rule with a
//!    graded confidence
//!
//! # Architecture
//!
//! ```text
//!   TelemetryService
//!     ├── TelemetrySimulator ──► SensorStore ──► RecordStore (aware_env)
//!     ├── LeakDetector ────────► TopologyGraph ─┘
//!     └── Aggregator
//! ```

pub mod aggregator;
pub mod config;
pub mod detector;
pub mod error;
pub mod locks;
pub mod model;
pub mod provision;
pub mod retry;
pub mod sensor_store;
pub mod service;
pub mod simulator;
pub mod sled_store;
pub mod topology;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use aggregator::{AggregateReport, Aggregator};
pub use config::{LeakThresholds, RetryPolicy, TelemetryConfig};
pub use detector::{LeakDetector, LeakReason, LeakVerdict};
pub use error::{Result, TelemetryError};
pub use model::{Asset, AssetType, Edge, LeakEvent, LeakSeverity, Node, ReadingStatus, Sensor, SensorKind};
pub use provision::Provisioner;
pub use sensor_store::{SensorFailure, SensorScan, SensorStore, SensorUpdate};
pub use service::{OperationStatus, ServiceResponse, TelemetryService};
pub use simulator::{MutationSummary, RefreshSummary, TelemetrySimulator};
pub use sled_store::SledRecordStore;
pub use topology::{NetworkSnapshot, TopologyGraph};
