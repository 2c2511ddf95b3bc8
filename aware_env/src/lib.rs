//! AWARE Environment Abstraction Layer
//!
//! This crate provides the seams that let the telemetry engine run against
//! **Production** collaborators (system clock, OS entropy, a real database)
//! or **Simulation** ones (virtual clock, seeded RNG, in-memory store).
//!
//! # Core Concept
//!
//! Every source of non-determinism the engine touches is reached through a
//! trait held by reference:
//! - Time and randomness (`TelemetryContext`)
//! - Persistence (`RecordStore`)
//!
//! Swapping the implementations makes jitter bounds and race behaviour
//! assertable from tests with a fixed seed.
//!
//! # Example
//!
//! ```ignore
//! use aware_env::{Filter, MemoryStore, RecordStore, TokioContext};
//!
//! let store = MemoryStore::shared();
//! let rows = store.query("sensors", &Filter::eq("asset_id", "E1")).await?;
//! ```

mod context;
mod error;
mod memory;
mod store;
mod tokio_impl;

pub use context::TelemetryContext;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{Filter, Record, RecordStore};
pub use tokio_impl::TokioContext;
