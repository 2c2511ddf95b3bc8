//! TelemetrySimulator - jitter, reset and leak injection.
//!
//! Every mutation follows the same path: take the asset lock, re-read the
//! asset's sensors, compute the new value, stamp it, and persist value and
//! timestamp in one store update. There are no internal timers; callers
//! decide cadence.

use aware_env::{RecordStore, TelemetryContext};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::locks::AssetLocks;
use crate::model::{AssetType, Sensor, SensorKind};
use crate::sensor_store::{group_by_asset_ordered, SensorFailure, SensorUpdate};
use crate::topology::TopologyGraph;

// ============================================================================
// SUMMARIES
// ============================================================================

/// Outcome of a `refresh_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    /// Sensor rows in the snapshot the pass started from
    pub total: usize,
    /// Sensors written, null readings included
    pub updated: usize,
    /// Write failures plus rows rejected as malformed or dangling
    pub failed: usize,
    /// Sensors with no reading; stamped but never jittered
    pub skipped_null: usize,
    /// The pass was stopped early; `updated` counts what was committed
    pub cancelled: bool,
    pub failures: Vec<SensorFailure>,
}

impl RefreshSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Outcome of a single-asset mutation (`reset_asset_sensors`, `simulate_leak`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationSummary {
    pub asset_id: String,
    pub updated: usize,
    pub failed: usize,
    /// Sensors the operation does not act on (flow and unknown kinds during a leak)
    pub untouched: usize,
    pub failures: Vec<SensorFailure>,
    /// Sensor kinds the operation wanted but the asset does not carry
    pub missing_kinds: Vec<SensorKind>,
}

impl MutationSummary {
    fn new(asset_id: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.missing_kinds.is_empty()
    }
}

/// Counters shared by the per-asset refresh tasks.
///
/// They live outside the tasks so a cancelled pass still reports what the
/// aborted tasks committed before they stopped.
#[derive(Debug, Default)]
struct RefreshCounters {
    updated: AtomicUsize,
    failed: AtomicUsize,
    skipped_null: AtomicUsize,
    failures: Mutex<Vec<SensorFailure>>,
}

impl RefreshCounters {
    fn fail(&self, sensor_id: &str, asset_id: &str, error: &TelemetryError) {
        self.record(SensorFailure::new(sensor_id, asset_id, error));
    }

    fn record(&self, failure: SensorFailure) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(failure);
    }

    fn summary(&self, total: usize, cancelled: bool) -> RefreshSummary {
        let failures = std::mem::take(&mut *self.failures.lock().unwrap_or_else(|e| e.into_inner()));
        RefreshSummary {
            total,
            updated: self.updated.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped_null: self.skipped_null.load(Ordering::SeqCst),
            cancelled,
            failures,
        }
    }
}

// ============================================================================
// SIMULATOR
// ============================================================================

/// Mutates sensor readings inside physical bounds.
///
/// Cheap to clone; clones share the store, the context and the asset locks,
/// so exclusion holds across every clone.
pub struct TelemetrySimulator<Ctx: TelemetryContext, St: RecordStore> {
    ctx: Arc<Ctx>,
    topology: Arc<TopologyGraph<St>>,
    locks: Arc<AssetLocks>,
    config: Arc<TelemetryConfig>,
}

impl<Ctx: TelemetryContext, St: RecordStore> Clone for TelemetrySimulator<Ctx, St> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            topology: Arc::clone(&self.topology),
            locks: Arc::clone(&self.locks),
            config: Arc::clone(&self.config),
        }
    }
}

impl<Ctx: TelemetryContext, St: RecordStore> TelemetrySimulator<Ctx, St> {
    /// Creates a simulator over `store`.
    ///
    /// # Returns
    /// * `Err(InvalidConfig)` - the config fails `TelemetryConfig::validate`
    pub fn new(ctx: Arc<Ctx>, store: Arc<St>, config: TelemetryConfig) -> Result<Self> {
        config.validate()?;
        let topology = Arc::new(TopologyGraph::new(store, config.retry.clone()));
        Ok(Self {
            ctx,
            topology,
            locks: Arc::new(AssetLocks::new()),
            config: Arc::new(config),
        })
    }

    pub fn topology(&self) -> &Arc<TopologyGraph<St>> {
        &self.topology
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }

    /// Mutation time for a sensor: the context clock, never behind the
    /// sensor's current stamp.
    fn stamp(&self, sensor: &Sensor) -> u64 {
        self.ctx.now_ms().max(sensor.last_seen)
    }

    fn jittered(&self, kind: &SensorKind, value: f64) -> f64 {
        match kind.jitter_bound(&self.config.jitter) {
            Some(bound) => kind.clamp(value + self.ctx.uniform(-bound, bound)),
            None => value,
        }
    }

    // ------------------------------------------------------------------------
    // Jitter
    // ------------------------------------------------------------------------

    /// Applies one round of organic jitter to every sensor with a reading.
    /// Null readings keep their null value and get a fresh `last_seen`.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let (_keep_open, cancel) = watch::channel(false);
        self.refresh_all_with_cancel(cancel).await
    }

    /// Like `refresh_all`, stopping early once `cancel` turns `true`.
    ///
    /// Assets are processed in parallel, one task per asset. A cancelled
    /// pass aborts the outstanding tasks; writes that already landed stay
    /// committed and are counted in the summary.
    ///
    /// Rows that do not decode, and sensors whose asset does not resolve,
    /// are never written; each is reported as a failure of its own.
    ///
    /// # Returns
    /// * `Err(StoreFailure)` - the initial snapshot could not be read
    pub async fn refresh_all_with_cancel(&self, mut cancel: watch::Receiver<bool>) -> Result<RefreshSummary> {
        let (scan, _) = self.topology.resolved_sensors().await?;
        let total = scan.sensors.len() + scan.rejected.len();
        let counters = Arc::new(RefreshCounters::default());
        for failure in scan.rejected {
            counters.record(failure);
        }
        let snapshot = scan.sensors;

        if *cancel.borrow() {
            info!("refresh cancelled before start ({} sensors)", total);
            return Ok(counters.summary(total, true));
        }

        let mut tasks = JoinSet::new();
        for (asset_id, members) in group_by_asset_ordered(&snapshot) {
            let sensor_ids: HashSet<String> = members.iter().map(|s| s.id.clone()).collect();
            let this = self.clone();
            let counters = Arc::clone(&counters);
            tasks.spawn(async move {
                this.refresh_asset(&asset_id, &sensor_ids, &counters).await;
            });
        }

        let mut cancelled = false;
        let mut signal_open = true;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!("refresh task ended abnormally: {}", e),
                },
                changed = cancel.changed(), if signal_open => match changed {
                    Ok(()) if *cancel.borrow() => {
                        cancelled = true;
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => signal_open = false,
                },
            }
        }

        let summary = counters.summary(total, cancelled);
        info!(
            "refresh: {} updated, {} failed, {} null, cancelled={}",
            summary.updated, summary.failed, summary.skipped_null, summary.cancelled
        );
        Ok(summary)
    }

    /// Refreshes the sensors of one asset that were in the pass snapshot.
    async fn refresh_asset(&self, asset_id: &str, snapshot_ids: &HashSet<String>, counters: &RefreshCounters) {
        let _guard = self.locks.lock(asset_id).await;

        let scan = match self.topology.sensors().scan_by_asset(asset_id).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!("refresh: could not re-read sensors of {}: {}", asset_id, e);
                for id in snapshot_ids {
                    counters.fail(id, asset_id, &e);
                }
                return;
            }
        };
        for failure in scan.rejected {
            if snapshot_ids.contains(&failure.sensor_id) {
                counters.record(failure);
            }
        }

        for sensor in scan.sensors.iter().filter(|s| snapshot_ids.contains(&s.id)) {
            let value = match sensor.value {
                Some(value) => Some(self.jittered(&sensor.kind, value)),
                None => {
                    counters.skipped_null.fetch_add(1, Ordering::SeqCst);
                    None
                }
            };

            let update = SensorUpdate {
                value,
                last_seen: self.stamp(sensor),
            };
            match self.topology.sensors().write(&sensor.id, update).await {
                Ok(()) => {
                    counters.updated.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!("refresh: sensor {} on {}: {}", sensor.id, asset_id, e);
                    counters.fail(&sensor.id, asset_id, &e);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reset and leak injection
    // ------------------------------------------------------------------------

    /// Returns every sensor on the asset to its per-kind baseline.
    ///
    /// Null readings are restored too. Unknown kinds keep their value and
    /// only get a fresh `last_seen`.
    ///
    /// # Returns
    /// * `Err(NotFound)` - the asset does not exist (nothing is written)
    pub async fn reset_asset_sensors(&self, asset_id: &str) -> Result<MutationSummary> {
        let asset = self.topology.resolve_asset(asset_id).await?;
        let baseline = &self.config.baseline;

        let (summary, _) = self
            .mutate_asset(asset_id, asset.asset_type(), |sensor| Some(sensor.kind.baseline(baseline).or(sensor.value)))
            .await?;

        info!("reset {}: {} sensors to baseline", asset_id, summary.updated);
        Ok(summary)
    }

    /// Forces an edge's readings into the leak signature: pressure low and
    /// acoustic high. Flow and unknown kinds are left alone.
    ///
    /// An edge missing one of the two kinds still gets the other written;
    /// the gap is reported in `missing_kinds`.
    ///
    /// # Returns
    /// * `Err(NotFound)` - no edge with that id (nothing is written)
    pub async fn simulate_leak(&self, edge_id: &str) -> Result<MutationSummary> {
        self.topology.find_asset_by_id(edge_id, AssetType::Edge).await?;
        let leak = &self.config.leak_injection;

        let (mut summary, sensors) = self
            .mutate_asset(edge_id, AssetType::Edge, |sensor| match sensor.kind {
                SensorKind::Pressure => Some(Some(leak.pressure)),
                SensorKind::Acoustic => Some(Some(leak.acoustic)),
                SensorKind::Flow | SensorKind::Other(_) => None,
            })
            .await?;

        for wanted in [SensorKind::Pressure, SensorKind::Acoustic] {
            if !sensors.iter().any(|s| s.kind == wanted) {
                summary.missing_kinds.push(wanted);
            }
        }
        if !summary.missing_kinds.is_empty() {
            warn!("simulate_leak {}: no {:?} sensors, leak signature is incomplete", edge_id, summary.missing_kinds);
        }
        info!("simulate_leak {}: {} sensors forced", edge_id, summary.updated);
        Ok(summary)
    }

    /// Applies `target` to each sensor of the asset under the asset lock.
    ///
    /// `target` returns `None` to leave a sensor untouched, or the value to
    /// write. A failed write is recorded and does not stop its siblings, as
    /// is a row that does not decode or names the other asset type.
    /// Also returns the usable sensors as read under the lock.
    async fn mutate_asset<F>(
        &self,
        asset_id: &str,
        asset_type: AssetType,
        target: F,
    ) -> Result<(MutationSummary, Vec<Sensor>)>
    where
        F: Fn(&Sensor) -> Option<Option<f64>>,
    {
        let _guard = self.locks.lock(asset_id).await;
        let scan = self.topology.sensors().scan_by_asset(asset_id).await?;
        let mut summary = MutationSummary::new(asset_id);
        summary.failures = scan.rejected;

        let (sensors, mismatched): (Vec<Sensor>, Vec<Sensor>) =
            scan.sensors.into_iter().partition(|s| s.asset_type == asset_type);
        for sensor in &mismatched {
            let err = TelemetryError::DanglingReference {
                from: format!("sensor {}", sensor.id),
                asset_type: sensor.asset_type,
                asset_id: sensor.asset_id.clone(),
            };
            warn!("{}: {}", asset_id, err);
            summary.failures.push(SensorFailure::new(&sensor.id, asset_id, &err));
        }
        summary.failed = summary.failures.len();

        for sensor in &sensors {
            let Some(value) = target(sensor) else {
                summary.untouched += 1;
                continue;
            };

            let update = SensorUpdate {
                value,
                last_seen: self.stamp(sensor),
            };
            match self.topology.sensors().write(&sensor.id, update).await {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!("{}: sensor {} not written: {}", asset_id, sensor.id, e);
                    summary.failed += 1;
                    summary.failures.push(SensorFailure::new(&sensor.id, asset_id, &e));
                }
            }
        }

        debug!("{}: {} written, {} failed, {} untouched", asset_id, summary.updated, summary.failed, summary.untouched);
        Ok((summary, sensors))
    }
}
