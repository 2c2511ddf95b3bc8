//! LeakDetector - threshold rule over an edge's readings.
//!
//! A leak is low pressure AND high acoustic signature on the same edge. The
//! rule itself is pure; the async methods only gather the readings.

use aware_env::RecordStore;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::LeakThresholds;
use crate::error::{Result, TelemetryError};
use crate::model::{AssetType, LeakEvent, LeakSeverity, Sensor, SensorKind};
use crate::sensor_store::SensorFailure;
use crate::topology::TopologyGraph;

/// Name recorded in `LeakEvent::detected_by`.
pub const DETECTED_BY: &str = "threshold-rule";

/// Floor on the confidence of a detected leak, so it never reads as zero.
pub const MIN_LEAK_CONFIDENCE: f64 = 0.01;

/// Why the detector reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeakReason {
    LeakDetected,
    /// Acoustic is high but no pressure reading is low
    PressureNominal,
    /// Pressure is low but no acoustic reading is high
    AcousticNominal,
    BothNominal,
    /// No non-null pressure or no non-null acoustic reading
    InsufficientData,
}

impl LeakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakReason::LeakDetected => "leak-detected",
            LeakReason::PressureNominal => "pressure-nominal",
            LeakReason::AcousticNominal => "acoustic-nominal",
            LeakReason::BothNominal => "both-nominal",
            LeakReason::InsufficientData => "insufficient-data",
        }
    }
}

/// Result of applying the rule to a set of readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub leak: bool,
    pub confidence: f64,
    pub reason: LeakReason,
    pub min_pressure: Option<f64>,
    pub max_acoustic: Option<f64>,
}

/// Evaluation of one edge, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakVerdict {
    pub asset: String,
    pub asset_name: String,
    pub leak: bool,
    pub confidence: f64,
    pub reason: LeakReason,
    pub min_pressure: Option<f64>,
    pub max_acoustic: Option<f64>,
}

impl LeakVerdict {
    fn new(asset: &str, asset_name: &str, eval: Evaluation) -> Self {
        Self {
            asset: asset.to_string(),
            asset_name: asset_name.to_string(),
            leak: eval.leak,
            confidence: eval.confidence,
            reason: eval.reason,
            min_pressure: eval.min_pressure,
            max_acoustic: eval.max_acoustic,
        }
    }
}

/// Deterministic leak rule.
#[derive(Debug, Clone, Default)]
pub struct LeakDetector {
    thresholds: LeakThresholds,
}

impl LeakDetector {
    pub fn new(thresholds: LeakThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &LeakThresholds {
        &self.thresholds
    }

    /// Applies the rule to a list of readings.
    ///
    /// Only pressure and acoustic readings count; null values are absent.
    /// Missing either kind yields `InsufficientData`, never an error.
    pub fn evaluate_readings<'a, I>(&self, sensors: I) -> Evaluation
    where
        I: IntoIterator<Item = &'a Sensor>,
    {
        let mut min_pressure: Option<f64> = None;
        let mut max_acoustic: Option<f64> = None;

        for sensor in sensors {
            let Some(value) = sensor.value else { continue };
            match sensor.kind {
                SensorKind::Pressure => {
                    min_pressure = Some(min_pressure.map_or(value, |m| m.min(value)));
                }
                SensorKind::Acoustic => {
                    max_acoustic = Some(max_acoustic.map_or(value, |m| m.max(value)));
                }
                SensorKind::Flow | SensorKind::Other(_) => {}
            }
        }

        let (Some(p), Some(a)) = (min_pressure, max_acoustic) else {
            return Evaluation {
                leak: false,
                confidence: 0.0,
                reason: LeakReason::InsufficientData,
                min_pressure,
                max_acoustic,
            };
        };

        let t = &self.thresholds;
        let pressure_low = p < t.low_pressure;
        let acoustic_high = a > t.high_acoustic;

        let (leak, reason) = match (pressure_low, acoustic_high) {
            (true, true) => (true, LeakReason::LeakDetected),
            (false, true) => (false, LeakReason::PressureNominal),
            (true, false) => (false, LeakReason::AcousticNominal),
            (false, false) => (false, LeakReason::BothNominal),
        };

        let confidence = if leak {
            let p_excess = normalized_excess(t.low_pressure - p, t.low_pressure);
            let a_excess = normalized_excess(a - t.high_acoustic, t.high_acoustic);
            ((p_excess + a_excess) / 2.0).max(MIN_LEAK_CONFIDENCE)
        } else {
            0.0
        };

        Evaluation {
            leak,
            confidence,
            reason,
            min_pressure,
            max_acoustic,
        }
    }

    /// Evaluates one edge over a fresh snapshot of its sensors.
    ///
    /// # Returns
    /// * `Err(NotFound)` - no edge with that id
    pub async fn evaluate<St: RecordStore>(&self, topology: &TopologyGraph<St>, edge_id: &str) -> Result<LeakVerdict> {
        let (mut verdicts, _) = self.assess(topology, Some(edge_id)).await?;
        verdicts.pop().ok_or_else(|| TelemetryError::not_found("edge", edge_id))
    }

    /// Evaluates every edge, or only `edge_id` when given, in edge order.
    pub async fn evaluate_all<St: RecordStore>(
        &self,
        topology: &TopologyGraph<St>,
        edge_id: Option<&str>,
    ) -> Result<Vec<LeakVerdict>> {
        Ok(self.assess(topology, edge_id).await?.0)
    }

    /// Like `evaluate_all`, also returning the sensor rows left out of the
    /// verdicts because they do not decode or do not resolve.
    pub async fn assess<St: RecordStore>(
        &self,
        topology: &TopologyGraph<St>,
        edge_id: Option<&str>,
    ) -> Result<(Vec<LeakVerdict>, Vec<SensorFailure>)> {
        let (edges, scan) = match edge_id {
            Some(id) => {
                let edge = topology.find_asset_by_id(id, AssetType::Edge).await?;
                let index = topology.asset_index().await?;
                let scan = topology.sensors().scan_by_asset(id).await?.reject_dangling(&index);
                (vec![(edge.id().to_string(), edge.name().to_string())], scan)
            }
            None => {
                let edges = topology.edges().await?;
                let (scan, _) = topology.resolved_sensors().await?;
                (edges.into_iter().map(|e| (e.id, e.name)).collect(), scan)
            }
        };

        let mut by_edge: HashMap<&str, Vec<&Sensor>> = HashMap::new();
        for sensor in scan.sensors.iter().filter(|s| s.asset_type == AssetType::Edge) {
            by_edge.entry(sensor.asset_id.as_str()).or_default().push(sensor);
        }

        let verdicts = edges
            .iter()
            .map(|(id, name)| {
                let readings = by_edge.get(id.as_str()).map(Vec::as_slice).unwrap_or_default();
                LeakVerdict::new(id, name, self.evaluate_readings(readings.iter().copied()))
            })
            .collect();
        Ok((verdicts, scan.rejected))
    }

    /// Builds the event a detected leak is reported as; `None` for no leak.
    pub fn to_event(&self, verdict: &LeakVerdict, now_ms: u64) -> Option<LeakEvent> {
        if !verdict.leak {
            return None;
        }
        Some(LeakEvent {
            asset_ref: verdict.asset.clone(),
            asset_type: AssetType::Edge,
            severity: LeakSeverity::from_confidence(verdict.confidence),
            confidence: verdict.confidence,
            detected_by: DETECTED_BY.to_string(),
            created_at: now_ms,
        })
    }
}

/// `excess / scale` clamped to [0, 1]. A zero scale saturates.
fn normalized_excess(excess: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return if excess > 0.0 { 1.0 } else { 0.0 };
    }
    (excess / scale).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::testing::seed_store;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn reading(kind: SensorKind, value: Option<f64>) -> Sensor {
        Sensor::provision("E1", AssetType::Edge, kind, value, 0)
    }

    fn detector() -> LeakDetector {
        LeakDetector::new(LeakThresholds::default())
    }

    #[test]
    fn test_low_pressure_high_acoustic_is_leak() {
        let eval = detector().evaluate_readings(&[
            reading(SensorKind::Pressure, Some(45.0)),
            reading(SensorKind::Acoustic, Some(3.5)),
        ]);

        assert!(eval.leak);
        assert_eq!(eval.reason, LeakReason::LeakDetected);
        // p = 15/60 = 0.25, a = 1.0/2.5 = 0.4
        assert_relative_eq!(eval.confidence, 0.325, epsilon = 1e-9);
    }

    #[test]
    fn test_nominal_pressure_is_not_leak() {
        let eval = detector().evaluate_readings(&[
            reading(SensorKind::Pressure, Some(65.0)),
            reading(SensorKind::Acoustic, Some(3.5)),
        ]);

        assert!(!eval.leak);
        assert_eq!(eval.confidence, 0.0);
        assert_eq!(eval.reason, LeakReason::PressureNominal);
    }

    #[test]
    fn test_reasons_for_each_nominal_case() {
        let d = detector();
        let low_quiet = d.evaluate_readings(&[
            reading(SensorKind::Pressure, Some(50.0)),
            reading(SensorKind::Acoustic, Some(2.0)),
        ]);
        assert_eq!(low_quiet.reason, LeakReason::AcousticNominal);

        let normal = d.evaluate_readings(&[
            reading(SensorKind::Pressure, Some(65.0)),
            reading(SensorKind::Acoustic, Some(2.0)),
        ]);
        assert_eq!(normal.reason, LeakReason::BothNominal);
    }

    #[test]
    fn test_missing_or_null_kind_is_insufficient_data() {
        let d = detector();
        let no_acoustic = d.evaluate_readings(&[reading(SensorKind::Pressure, Some(10.0))]);
        assert!(!no_acoustic.leak);
        assert_eq!(no_acoustic.reason, LeakReason::InsufficientData);

        let null_acoustic = d.evaluate_readings(&[
            reading(SensorKind::Pressure, Some(10.0)),
            reading(SensorKind::Acoustic, None),
        ]);
        assert_eq!(null_acoustic.reason, LeakReason::InsufficientData);
        assert_eq!(null_acoustic.max_acoustic, None);
    }

    #[test]
    fn test_any_pair_of_readings_can_trip_rule() {
        let eval = detector().evaluate_readings(&[
            reading(SensorKind::Pressure, Some(70.0)),
            reading(SensorKind::Pressure, Some(58.0)),
            reading(SensorKind::Acoustic, Some(1.0)),
            reading(SensorKind::Acoustic, Some(2.6)),
        ]);
        assert!(eval.leak);
        assert_eq!(eval.min_pressure, Some(58.0));
        assert_eq!(eval.max_acoustic, Some(2.6));
    }

    #[test]
    fn test_confidence_floor_and_monotonic() {
        let d = detector();
        let barely = d.evaluate_readings(&[
            reading(SensorKind::Pressure, Some(59.999)),
            reading(SensorKind::Acoustic, Some(2.5001)),
        ]);
        assert!(barely.leak);
        assert_relative_eq!(barely.confidence, MIN_LEAK_CONFIDENCE);

        let severe = d.evaluate_readings(&[
            reading(SensorKind::Pressure, Some(0.0)),
            reading(SensorKind::Acoustic, Some(50.0)),
        ]);
        assert_relative_eq!(severe.confidence, 1.0);
        assert!(severe.confidence > barely.confidence);
    }

    #[test]
    fn test_to_event() {
        let d = detector();
        let verdict = LeakVerdict::new(
            "E1",
            "P1",
            d.evaluate_readings(&[
                reading(SensorKind::Pressure, Some(45.0)),
                reading(SensorKind::Acoustic, Some(3.5)),
            ]),
        );

        let event = d.to_event(&verdict, 9_000).unwrap();
        assert_eq!(event.asset_ref, "E1");
        assert_eq!(event.severity, LeakSeverity::Medium);
        assert_eq!(event.detected_by, "threshold-rule");
        assert_eq!(event.created_at, 9_000);

        let quiet = LeakVerdict { leak: false, ..verdict };
        assert!(d.to_event(&quiet, 9_000).is_none());
    }

    #[tokio::test]
    async fn test_evaluate_all_over_store() {
        let store = seed_store().await;
        let topology = TopologyGraph::new(Arc::clone(&store), RetryPolicy::no_retry());
        let d = detector();

        let verdicts = d.evaluate_all(&topology, None).await.unwrap();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].asset_name, "P1");
        assert_eq!(verdicts[0].reason, LeakReason::BothNominal);
        assert_eq!(verdicts[1].reason, LeakReason::InsufficientData);

        let one = d.evaluate_all(&topology, Some("E2")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].asset, "E2");

        assert!(d.evaluate(&topology, "N1").await.is_err());
    }

    #[tokio::test]
    async fn test_assess_ignores_and_reports_bad_rows() {
        use crate::model::tables;
        use crate::testing::sensor_row;
        use aware_env::RecordStore;

        let store = seed_store().await;
        store
            .insert(tables::SENSORS, sensor_row("S99", "E1", "pressure", Some(-4.0)))
            .await
            .unwrap();
        store
            .insert(tables::SENSORS, sensor_row("S50", "E404", "acoustic", Some(9.0)))
            .await
            .unwrap();
        let topology = TopologyGraph::new(Arc::clone(&store), RetryPolicy::no_retry());

        let (verdicts, rejected) = detector().assess(&topology, None).await.unwrap();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].min_pressure, Some(75.5));
        let ids: Vec<_> = rejected.iter().map(|f| f.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["S99", "S50"]);

        let (one, rejected) = detector().assess(&topology, Some("E1")).await.unwrap();
        assert_eq!(one[0].reason, LeakReason::BothNominal);
        assert_eq!(rejected.len(), 1);
    }
}
