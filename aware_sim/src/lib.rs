//! AWARE Deterministic Simulation Testing (DST) Harness
//!
//! Drives the telemetry engine through chaos scenarios where every source
//! of non-determinism is under control:
//! - **Time**: a virtual clock that only moves when a scenario advances it
//! - **Randomness**: jitter draws from a ChaCha8 stream seeded per run
//! - **Storage**: the in-memory store with injectable faults and latency,
//!   or sled when the scenario does not need faults
//!
//! # Architecture
//!
//! ```text
//!   ScenarioRunner ──► demo network (Provisioner)
//!        │
//!        └──► TelemetryService<SimContext, St>
//!                 └── St = MemoryStore | SledRecordStore
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use aware_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_passes(50).run(ScenarioId::Drift).await;
//! assert!(result.passed);
//! ```

mod context;
pub mod demo;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use demo::{seed_demo_network, DemoNetwork};
pub use runner::{ScenarioError, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
