//! Scenario runner - executes chaos engineering test scenarios.

use crate::context::SimContext;
use crate::demo::{seed_demo_network, DemoNetwork};
use crate::scenarios::ScenarioId;

use aware_core::{
    LeakReason, OperationStatus, Provisioner, RetryPolicy, Sensor, SledRecordStore, TelemetryConfig, TelemetryError,
    TelemetryService,
};
use aware_env::{MemoryStore, RecordStore, StoreError, TelemetryContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Slack for floating-point comparisons against jitter bounds.
const EPS: f64 = 1e-9;

/// Why a scenario run failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("engine error: {0}")]
    Engine(#[from] TelemetryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Violation(String),
}

fn violation(msg: impl Into<String>) -> ScenarioError {
    ScenarioError::Violation(msg.into())
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Wall-clock duration of the run
    pub elapsed_ms: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Refresh passes executed
    pub passes: u64,

    /// Sensors in the demo network
    pub sensors: usize,

    /// Sensor writes committed by refresh passes
    pub updated: u64,

    /// Sensor writes that failed
    pub failed: u64,

    /// Null readings skipped by refresh passes
    pub skipped_null: u64,

    /// Leak verdicts reported by the detector
    pub leaks_detected: u64,

    /// Asset resets performed
    pub resets: u64,
}

impl ScenarioMetrics {
    fn absorb(&mut self, summary: &aware_core::RefreshSummary) {
        self.passes += 1;
        self.updated += summary.updated as u64;
        self.failed += summary.failed as u64;
        self.skipped_null += summary.skipped_null as u64;
    }
}

/// Engine plus demo network for one run.
struct Fixture<St: RecordStore> {
    ctx: Arc<SimContext>,
    service: TelemetryService<SimContext, St>,
    network: DemoNetwork,
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Refresh passes (or storm rounds) per scenario
    passes: usize,

    /// Pipes in the demo network
    pipes: usize,

    /// Engine configuration
    config: TelemetryConfig,

    /// Run storage-agnostic scenarios on sled under this directory
    db_dir: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            passes: 20,
            pipes: 6,
            config: TelemetryConfig::default(),
            db_dir: None,
        }
    }

    /// Sets the number of passes.
    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes.max(1);
        self
    }

    /// Sets the demo network size.
    pub fn with_pipes(mut self, pipes: usize) -> Self {
        self.pipes = pipes;
        self
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs storage-agnostic scenarios against sled databases under `dir`.
    pub fn with_db(mut self, dir: impl Into<PathBuf>) -> Self {
        self.db_dir = Some(dir.into());
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let started = Instant::now();

        let outcome = self.execute(scenario).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(metrics) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                elapsed_ms,
                failure_reason: None,
                metrics,
            },
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                elapsed_ms,
                failure_reason: Some(e.to_string()),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    async fn execute(&self, scenario: ScenarioId) -> Result<ScenarioMetrics, ScenarioError> {
        if scenario.needs_fault_injection() {
            if self.db_dir.is_some() {
                info!("{} needs fault injection; using the in-memory store", scenario);
            }
            return match scenario {
                ScenarioId::StoreOutage => self.run_store_outage(MemoryStore::shared()).await,
                _ => self.run_cancelled_refresh(MemoryStore::shared()).await,
            };
        }

        match &self.db_dir {
            Some(dir) => {
                let path = dir.join(format!("{}_{}", scenario.name(), self.seed));
                debug!("sled database at {}", path.display());
                let store = Arc::new(SledRecordStore::open(&path)?);
                self.run_on(scenario, store).await
            }
            None => self.run_on(scenario, MemoryStore::shared()).await,
        }
    }

    async fn run_on<St: RecordStore>(&self, scenario: ScenarioId, store: Arc<St>) -> Result<ScenarioMetrics, ScenarioError> {
        match scenario {
            ScenarioId::Drift => self.run_drift(store).await,
            ScenarioId::LeakInjection => self.run_leak_injection(store).await,
            ScenarioId::ResetStorm => self.run_reset_storm(store).await,
            other => Err(violation(format!("{} cannot run on this backend", other))),
        }
    }

    async fn fixture<St: RecordStore>(&self, store: Arc<St>, config: TelemetryConfig) -> Result<Fixture<St>, ScenarioError> {
        let ctx = SimContext::shared(self.seed);
        let provisioner_retry = config.retry.clone();
        let baseline = config.baseline.clone();
        let service = TelemetryService::new(Arc::clone(&ctx), store, config)?;

        let provisioner = Provisioner::new(Arc::clone(service.simulator().topology()), provisioner_retry, baseline);
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let network = seed_demo_network(&provisioner, self.pipes, physics_seed, ctx.now_ms()).await?;

        Ok(Fixture { ctx, service, network })
    }

    /// SIM-001: Drift - repeated jitter passes.
    async fn run_drift<St: RecordStore>(&self, store: Arc<St>) -> Result<ScenarioMetrics, ScenarioError> {
        let fx = self.fixture(store, self.config.clone()).await?;
        let sim = fx.service.simulator();
        let mut metrics = ScenarioMetrics {
            sensors: fx.network.sensor_count,
            ..Default::default()
        };

        for pass in 0..self.passes {
            fx.ctx.advance_time(Duration::from_secs(1));
            let before = sim.topology().sensors().list_all().await?;

            let summary = sim.refresh_all().await?;
            if !summary.is_clean() {
                return Err(violation(format!("pass {}: unclean refresh {:?}", pass, summary)));
            }
            metrics.absorb(&summary);

            let after = sim.topology().sensors().list_all().await?;
            check_drift(&before, &after, &self.config)
                .map_err(|msg| violation(format!("pass {}: {}", pass, msg)))?;
        }

        let report = fx.service.evaluate_leaks(None).await;
        if let Some(data) = report.data {
            metrics.leaks_detected = data.verdicts.iter().filter(|v| v.leak).count() as u64;
        }
        debug!("drift: {} leaks after {} passes", metrics.leaks_detected, metrics.passes);
        Ok(metrics)
    }

    /// SIM-002: LeakInjection - force the leak signature on each pipe.
    async fn run_leak_injection<St: RecordStore>(&self, store: Arc<St>) -> Result<ScenarioMetrics, ScenarioError> {
        let fx = self.fixture(store, self.config.clone()).await?;
        let sim = fx.service.simulator();
        let detector = fx.service.detector();
        let topology = sim.topology();
        let mut metrics = ScenarioMetrics {
            sensors: fx.network.sensor_count,
            ..Default::default()
        };

        for edge_id in &fx.network.edge_ids {
            fx.ctx.advance_time(Duration::from_secs(1));
            let summary = sim.simulate_leak(edge_id).await?;
            let verdict = detector.evaluate(topology, edge_id).await?;

            if summary.missing_kinds.is_empty() {
                if !verdict.leak {
                    return Err(violation(format!("{}: injected leak not detected ({:?})", edge_id, verdict.reason)));
                }
                let event = detector
                    .to_event(&verdict, fx.ctx.now_ms())
                    .ok_or_else(|| violation(format!("{}: leak verdict produced no event", edge_id)))?;
                debug!("{}: {:?} leak, confidence {:.3}", edge_id, event.severity, event.confidence);
                metrics.leaks_detected += 1;
            } else if verdict.leak || verdict.reason != LeakReason::InsufficientData {
                return Err(violation(format!(
                    "{}: edge missing {:?} reported {:?}",
                    edge_id, summary.missing_kinds, verdict.reason
                )));
            }

            sim.reset_asset_sensors(edge_id).await?;
            let first = readings(&topology.sensors().list_by_asset(edge_id).await?);
            sim.reset_asset_sensors(edge_id).await?;
            let second = readings(&topology.sensors().list_by_asset(edge_id).await?);
            metrics.resets += 2;

            if first != second {
                return Err(violation(format!("{}: reset not idempotent {:?} vs {:?}", edge_id, first, second)));
            }
            if detector.evaluate(topology, edge_id).await?.leak {
                return Err(violation(format!("{}: leak persists after reset", edge_id)));
            }
        }

        let before = topology.sensors().list_all().await?;
        for attempt in [sim.simulate_leak("nonexistent").await, sim.reset_asset_sensors("nonexistent").await] {
            match attempt {
                Err(TelemetryError::NotFound { .. }) => {}
                other => return Err(violation(format!("unknown asset accepted: {:?}", other))),
            }
        }
        if topology.sensors().list_all().await? != before {
            return Err(violation("operation on unknown asset changed sensors"));
        }

        Ok(metrics)
    }

    /// SIM-003: ResetStorm - resets race refresh passes on the same assets.
    async fn run_reset_storm<St: RecordStore>(&self, store: Arc<St>) -> Result<ScenarioMetrics, ScenarioError> {
        let fx = self.fixture(store, self.config.clone()).await?;
        let sim = fx.service.simulator();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x5eed);
        let mut metrics = ScenarioMetrics {
            sensors: fx.network.sensor_count,
            ..Default::default()
        };

        for round in 0..self.passes {
            fx.ctx.advance_time(Duration::from_secs(1));
            let round_start = fx.ctx.now_ms();

            let targets: Vec<String> = (0..2)
                .map(|_| fx.network.edge_ids[rng.gen_range(0..fx.network.edge_ids.len())].clone())
                .collect();

            let mut tasks: JoinSet<Result<Option<aware_core::RefreshSummary>, TelemetryError>> = JoinSet::new();
            for (i, target) in targets.iter().enumerate() {
                let refresher = sim.clone();
                tasks.spawn(async move { refresher.refresh_all().await.map(Some) });

                let resetter = sim.clone();
                let target = target.clone();
                // Stagger so resets land before, between and after refresh passes
                let delay = Duration::from_micros(rng.gen_range(0..200u64) * i as u64);
                tasks.spawn(async move {
                    tokio::time::sleep(delay).await;
                    resetter.reset_asset_sensors(&target).await.map(|_| None)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(Some(summary))) => metrics.absorb(&summary),
                    Ok(Ok(None)) => metrics.resets += 1,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(e) => return Err(violation(format!("round {}: task failed: {}", round, e))),
                }
            }

            for target in &targets {
                let sensors = sim.topology().sensors().list_by_asset(target).await?;
                check_after_reset(&sensors, round_start, &self.config)
                    .map_err(|msg| violation(format!("round {} {}: {}", round, target, msg)))?;
            }
        }

        Ok(metrics)
    }

    /// SIM-004: StoreOutage - failing sensors and transient outages.
    async fn run_store_outage(&self, store: Arc<MemoryStore>) -> Result<ScenarioMetrics, ScenarioError> {
        let mut config = self.config.clone();
        config.retry = RetryPolicy {
            max_attempts: config.retry.max_attempts.max(2),
            backoff_ms: 0,
            ..config.retry
        };
        let fx = self.fixture(Arc::clone(&store), config).await?;
        let sim = fx.service.simulator();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x0dd);
        let mut metrics = ScenarioMetrics {
            sensors: fx.network.sensor_count,
            ..Default::default()
        };

        let sensors = sim.topology().sensors().list_all().await?;
        let mut failing: Vec<&Sensor> = sensors.iter().filter(|_| rng.gen_bool(0.25)).collect();
        if failing.is_empty() {
            failing.extend(sensors.first());
        }
        for sensor in &failing {
            store.fail_updates_for(&sensor.id);
        }
        // Null readings are stamped too, so every failing sensor shows up
        let expected_failed = failing.len();
        let expected_updated = sensors.len() - expected_failed;

        fx.ctx.advance_time(Duration::from_secs(1));
        let response = fx.service.refresh_all().await;
        let summary = response
            .data
            .ok_or_else(|| violation(format!("refresh returned no summary: {:?}", response.error)))?;
        if response.status != OperationStatus::Partial
            || summary.failed != expected_failed
            || summary.updated != expected_updated
        {
            return Err(violation(format!(
                "expected {} failures and {} updates, got {:?} {:?}",
                expected_failed,
                expected_updated,
                response.status,
                summary
            )));
        }
        metrics.absorb(&summary);

        for sensor in &failing {
            let now = sim.topology().sensors().get(&sensor.id).await?;
            if now.value != sensor.value || now.last_seen != sensor.last_seen {
                return Err(violation(format!("failed write to {} left a trace", sensor.id)));
            }
        }

        // One transient failure is absorbed by the retry budget
        store.heal_all();
        store.fail_next(1);
        let retried = sim.refresh_all().await?;
        if !retried.is_clean() {
            return Err(violation(format!("transient failure not retried: {:?}", retried)));
        }
        metrics.absorb(&retried);

        // A dead table surfaces as an error response, not a panic
        store.fail_table("sensors");
        let outage = fx.service.refresh_all().await;
        let kind = outage.error.as_ref().map(|e| e.kind.as_str());
        if outage.status != OperationStatus::Error || kind != Some("store_failure") {
            return Err(violation(format!("outage not reported as store failure: {:?}", outage.error)));
        }
        store.heal_all();

        info!("store_outage: {} injected write failures observed", metrics.failed);
        Ok(metrics)
    }

    /// SIM-005: CancelledRefresh - stop a slow refresh partway.
    async fn run_cancelled_refresh(&self, store: Arc<MemoryStore>) -> Result<ScenarioMetrics, ScenarioError> {
        let fx = self.fixture(Arc::clone(&store), self.config.clone()).await?;
        let sim = fx.service.simulator();
        let mut metrics = ScenarioMetrics {
            sensors: fx.network.sensor_count,
            ..Default::default()
        };

        store.set_latency(Duration::from_millis(5));
        fx.ctx.advance_time(Duration::from_secs(1));
        let pass_ms = fx.ctx.now_ms();

        let (cancel, signal) = watch::channel(false);
        let pass = {
            let sim = sim.clone();
            tokio::spawn(async move { sim.refresh_all_with_cancel(signal).await })
        };
        tokio::time::sleep(Duration::from_millis(22)).await;
        // The receiver is gone only if the pass already finished
        let _ = cancel.send(true);

        let summary = pass
            .await
            .map_err(|e| violation(format!("refresh task failed: {}", e)))??;
        store.set_latency(Duration::ZERO);

        if !summary.cancelled {
            return Err(violation("refresh finished before the cancel signal"));
        }
        let committed = sim
            .topology()
            .sensors()
            .list_all()
            .await?
            .iter()
            .filter(|s| s.last_seen == pass_ms)
            .count();
        if committed != summary.updated {
            return Err(violation(format!(
                "summary reports {} updates but {} sensors carry the pass stamp",
                summary.updated, committed
            )));
        }
        metrics.absorb(&summary);

        let follow_up = sim.refresh_all().await?;
        if !follow_up.is_clean() {
            return Err(violation(format!("refresh after cancel not clean: {:?}", follow_up)));
        }
        metrics.absorb(&follow_up);

        Ok(metrics)
    }
}

fn readings(sensors: &[Sensor]) -> Vec<(String, Option<f64>)> {
    sensors.iter().map(|s| (s.id.clone(), s.value)).collect()
}

/// Checks one refresh pass against the jitter rules.
fn check_drift(before: &[Sensor], after: &[Sensor], config: &TelemetryConfig) -> Result<(), String> {
    let old: HashMap<&str, &Sensor> = before.iter().map(|s| (s.id.as_str(), s)).collect();

    for sensor in after {
        let Some(prev) = old.get(sensor.id.as_str()) else {
            return Err(format!("sensor {} appeared mid-pass", sensor.id));
        };
        if sensor.last_seen < prev.last_seen {
            return Err(format!("{} last_seen went backwards", sensor.id));
        }

        match (prev.value, sensor.value) {
            (None, None) => {}
            (Some(old_v), Some(new_v)) => {
                if !new_v.is_finite() || new_v < 0.0 {
                    return Err(format!("{} out of bounds: {}", sensor.id, new_v));
                }
                let allowed = sensor.kind.jitter_bound(&config.jitter).unwrap_or(0.0);
                if (new_v - old_v).abs() > allowed + EPS {
                    return Err(format!("{} moved {} -> {} (bound {})", sensor.id, old_v, new_v, allowed));
                }
            }
            (prev_v, new_v) => {
                return Err(format!("{} null-ness changed: {:?} -> {:?}", sensor.id, prev_v, new_v));
            }
        }
    }
    Ok(())
}

/// After a storm round, a reset asset's sensors carry the round's stamp and
/// sit at baseline, or at most two jitter steps from it.
fn check_after_reset(sensors: &[Sensor], round_start: u64, config: &TelemetryConfig) -> Result<(), String> {
    for sensor in sensors {
        if sensor.last_seen < round_start {
            return Err(format!("{} stale: last_seen {} < round start {}", sensor.id, sensor.last_seen, round_start));
        }
        let (Some(value), Some(baseline)) = (sensor.value, sensor.kind.baseline(&config.baseline)) else {
            continue;
        };
        let allowed = 2.0 * sensor.kind.jitter_bound(&config.jitter).unwrap_or(0.0);
        if (value - baseline).abs() > allowed + EPS {
            return Err(format!("{} = {} is not a reset value (baseline {})", sensor.id, value, baseline));
        }
    }
    Ok(())
}
