//! Property tests for the jitter, null-propagation and leak-rule invariants,
//! plus seeded scenario sweeps.

use aware_core::{
    AssetType, LeakDetector, LeakReason, LeakThresholds, Provisioner, Sensor, SensorKind, TelemetryConfig,
    TelemetryService,
};
use aware_env::{MemoryStore, TelemetryContext};
use aware_sim::{seed_demo_network, ScenarioId, ScenarioRunner, SimContext};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn reading(kind: SensorKind, value: f64) -> Sensor {
    Sensor::provision("E1", AssetType::Edge, kind, Some(value), 0)
}

proptest! {
    #[test]
    fn clamp_never_goes_negative(value in -1_000.0f64..1_000.0) {
        for kind in [SensorKind::Pressure, SensorKind::Flow, SensorKind::Acoustic] {
            let clamped = kind.clamp(value);
            prop_assert!(clamped >= 0.0);
            prop_assert!(clamped == value || value < 0.0);
        }
        prop_assert_eq!(SensorKind::from("level").clamp(value), value);
    }

    #[test]
    fn leak_rule_matches_thresholds(pressure in 0.0f64..120.0, acoustic in 0.0f64..6.0) {
        let detector = LeakDetector::new(LeakThresholds::default());
        let eval = detector.evaluate_readings(&[
            reading(SensorKind::Pressure, pressure),
            reading(SensorKind::Acoustic, acoustic),
        ]);

        let expected = pressure < 60.0 && acoustic > 2.5;
        prop_assert_eq!(eval.leak, expected);
        if expected {
            prop_assert_eq!(eval.reason, LeakReason::LeakDetected);
            prop_assert!((0.01..=1.0).contains(&eval.confidence));
        } else {
            prop_assert_eq!(eval.confidence, 0.0);
        }
    }

    #[test]
    fn lower_pressure_never_lowers_confidence(
        a in 0.0f64..60.0,
        b in 0.0f64..60.0,
        acoustic in 2.6f64..6.0,
    ) {
        let detector = LeakDetector::new(LeakThresholds::default());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let conf = |p: f64| {
            detector
                .evaluate_readings(&[reading(SensorKind::Pressure, p), reading(SensorKind::Acoustic, acoustic)])
                .confidence
        };
        prop_assert!(conf(low) >= conf(high));
    }

    #[test]
    fn null_readings_are_absent_to_the_rule(acoustic in 2.6f64..6.0) {
        let detector = LeakDetector::new(LeakThresholds::default());
        let eval = detector.evaluate_readings(&[
            Sensor::provision("E1", AssetType::Edge, SensorKind::Pressure, None, 0),
            reading(SensorKind::Acoustic, acoustic),
        ]);
        prop_assert!(!eval.leak);
        prop_assert_eq!(eval.reason, LeakReason::InsufficientData);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn refresh_keeps_values_bounded_and_nulls_null(seed in any::<u64>(), passes in 1usize..6) {
        let config = TelemetryConfig::default();
        let (before, after) = runtime().block_on(async {
            let ctx = SimContext::shared(seed);
            let store = MemoryStore::shared();
            let service = TelemetryService::new(Arc::clone(&ctx), store, config.clone()).unwrap();
            let provisioner = Provisioner::new(
                Arc::clone(service.simulator().topology()),
                config.retry.clone(),
                config.baseline.clone(),
            );
            seed_demo_network(&provisioner, 3, seed, ctx.now_ms()).await.unwrap();

            let sensors = service.simulator().topology().sensors();
            let before = sensors.list_all().await.unwrap();
            for _ in 0..passes {
                ctx.advance_time(Duration::from_secs(1));
                service.simulator().refresh_all().await.unwrap();
            }
            (before, sensors.list_all().await.unwrap())
        });

        let old: HashMap<&str, &Sensor> = before.iter().map(|s| (s.id.as_str(), s)).collect();
        prop_assert_eq!(before.len(), after.len());
        for sensor in &after {
            let prev = old[sensor.id.as_str()];
            prop_assert_eq!(prev.value.is_none(), sensor.value.is_none());
            prop_assert!(sensor.last_seen >= prev.last_seen);
            if let (Some(old_v), Some(new_v)) = (prev.value, sensor.value) {
                let bound = sensor.kind.jitter_bound(&config.jitter).unwrap_or(0.0);
                prop_assert!(new_v >= 0.0);
                prop_assert!((new_v - old_v).abs() <= bound * passes as f64 + 1e-9);
            }
        }
    }

    #[test]
    fn leak_injection_passes_for_any_seed(seed in any::<u64>()) {
        let result = runtime().block_on(ScenarioRunner::new(seed).with_pipes(3).run(ScenarioId::LeakInjection));
        prop_assert!(result.passed, "{:?}", result.failure_reason);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_scenario_passes_across_seeds() {
    for seed in [1u64, 42, 0xdead_beef] {
        let runner = ScenarioRunner::new(seed).with_passes(8);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(
                result.passed,
                "{} seed={} failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
        }
    }
}

#[tokio::test]
async fn drift_is_reproducible_for_a_seed() {
    let a = ScenarioRunner::new(99).with_passes(10).run(ScenarioId::Drift).await;
    let b = ScenarioRunner::new(99).with_passes(10).run(ScenarioId::Drift).await;

    assert!(a.passed && b.passed);
    assert_eq!(a.metrics.updated, b.metrics.updated);
    assert_eq!(a.metrics.leaks_detected, b.metrics.leaks_detected);
}
