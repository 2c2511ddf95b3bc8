//! TelemetryService - caller-facing facade.
//!
//! Wraps every engine operation in a `ServiceResponse` so an API layer can
//! hand results straight back as JSON. Nothing here panics on bad input;
//! failures become `status: error` with a typed error body.

use aware_env::{RecordStore, TelemetryContext};
use serde::Serialize;
use std::sync::Arc;

use crate::aggregator::{AggregateReport, Aggregator};
use crate::config::TelemetryConfig;
use crate::detector::{LeakDetector, LeakVerdict};
use crate::error::{Result, TelemetryError};
use crate::model::{LeakEvent, ReadingStatus, Sensor};
use crate::sensor_store::SensorFailure;
use crate::simulator::{MutationSummary, RefreshSummary, TelemetrySimulator};
use crate::topology::NetworkSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&TelemetryError> for ErrorBody {
    fn from(err: &TelemetryError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceResponse<T> {
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    fn respond(result: Result<T>, is_partial: impl FnOnce(&T) -> bool) -> Self {
        match result {
            Ok(data) => Self {
                status: if is_partial(&data) {
                    OperationStatus::Partial
                } else {
                    OperationStatus::Success
                },
                error: None,
                data: Some(data),
            },
            Err(e) => Self {
                status: OperationStatus::Error,
                error: Some(ErrorBody::from(&e)),
                data: None,
            },
        }
    }

    fn complete(result: Result<T>) -> Self {
        Self::respond(result, |_| false)
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// A sensor together with its dashboard classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(flatten)]
    pub sensor: Sensor,
    pub status: ReadingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorListing {
    pub count: usize,
    pub sensors: Vec<SensorReading>,
    /// Rows left out because they do not decode or their asset does not resolve
    pub rejected: Vec<SensorFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakReport {
    pub verdicts: Vec<LeakVerdict>,
    pub events: Vec<LeakEvent>,
    pub rejected: Vec<SensorFailure>,
}

/// Composes simulator, detector and aggregator over one store.
pub struct TelemetryService<Ctx: TelemetryContext, St: RecordStore> {
    simulator: TelemetrySimulator<Ctx, St>,
    detector: LeakDetector,
    aggregator: Aggregator<St>,
}

impl<Ctx: TelemetryContext, St: RecordStore> TelemetryService<Ctx, St> {
    pub fn new(ctx: Arc<Ctx>, store: Arc<St>, config: TelemetryConfig) -> Result<Self> {
        let detector = LeakDetector::new(config.thresholds.clone());
        let simulator = TelemetrySimulator::new(ctx, store, config)?;
        let aggregator = Aggregator::new(Arc::clone(simulator.topology()));
        Ok(Self {
            simulator,
            detector,
            aggregator,
        })
    }

    pub fn simulator(&self) -> &TelemetrySimulator<Ctx, St> {
        &self.simulator
    }

    pub fn detector(&self) -> &LeakDetector {
        &self.detector
    }

    pub fn aggregator(&self) -> &Aggregator<St> {
        &self.aggregator
    }

    /// Partial when any sensor row was rejected.
    pub async fn list_sensors(&self) -> ServiceResponse<SensorListing> {
        let limits = &self.simulator.config().alerts;
        let result = self.simulator.topology().resolved_sensors().await.map(|(scan, _)| {
            let sensors: Vec<SensorReading> = scan
                .sensors
                .into_iter()
                .map(|sensor| SensorReading {
                    status: ReadingStatus::classify(&sensor, limits),
                    sensor,
                })
                .collect();
            SensorListing {
                count: sensors.len(),
                sensors,
                rejected: scan.rejected,
            }
        });
        ServiceResponse::respond(result, |l| !l.rejected.is_empty())
    }

    /// Partial when any sensor failed or the pass was cancelled.
    pub async fn refresh_all(&self) -> ServiceResponse<RefreshSummary> {
        ServiceResponse::respond(self.simulator.refresh_all().await, |s| !s.is_clean())
    }

    pub async fn reset_asset(&self, asset_id: &str) -> ServiceResponse<MutationSummary> {
        ServiceResponse::respond(self.simulator.reset_asset_sensors(asset_id).await, |s| s.failed > 0)
    }

    /// Partial when a write failed or the edge lacks a pressure or acoustic
    /// sensor.
    pub async fn simulate_leak(&self, edge_id: &str) -> ServiceResponse<MutationSummary> {
        ServiceResponse::respond(self.simulator.simulate_leak(edge_id).await, |s| !s.is_clean())
    }

    /// Verdicts for every edge (or one), plus an event per detected leak.
    /// Partial when a sensor row had to be left out.
    pub async fn evaluate_leaks(&self, edge_id: Option<&str>) -> ServiceResponse<LeakReport> {
        let now = self.simulator.context().now_ms();
        let result = self
            .detector
            .assess(self.simulator.topology(), edge_id)
            .await
            .map(|(verdicts, rejected)| {
                let events = verdicts
                    .iter()
                    .filter_map(|v| self.detector.to_event(v, now))
                    .collect();
                LeakReport {
                    verdicts,
                    events,
                    rejected,
                }
            });
        ServiceResponse::respond(result, |r| !r.rejected.is_empty())
    }

    pub async fn topology(&self) -> ServiceResponse<NetworkSnapshot> {
        ServiceResponse::complete(self.simulator.topology().snapshot().await)
    }

    pub async fn aggregate(&self) -> ServiceResponse<AggregateReport> {
        ServiceResponse::respond(self.aggregator.report().await, |r| !r.rejected.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::model::tables;
    use crate::testing::{seed_store, sensor_row, FixedContext};
    use aware_env::{MemoryStore, RecordStore};
    use serde_json::json;

    async fn service() -> (Arc<MemoryStore>, TelemetryService<FixedContext, MemoryStore>) {
        let store = seed_store().await;
        let config = TelemetryConfig {
            retry: RetryPolicy::no_retry(),
            ..Default::default()
        };
        let service = TelemetryService::new(FixedContext::new(8_000, 0.5), Arc::clone(&store), config).unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn test_list_sensors_classifies_readings() {
        let (_, service) = service().await;
        let response = service.list_sensors().await;
        assert!(response.is_success());

        let listing = response.data.unwrap();
        assert_eq!(listing.count, 6);
        assert_eq!(listing.sensors[4].status, ReadingStatus::NoReading);

        let encoded = serde_json::to_value(&listing.sensors[0]).unwrap();
        assert_eq!(encoded["id"], json!("S1"));
        assert_eq!(encoded["status"], json!("normal"));
    }

    #[tokio::test]
    async fn test_simulate_then_evaluate_reports_leak_event() {
        let (_, service) = service().await;
        assert!(service.simulate_leak("E1").await.is_success());

        let report = service.evaluate_leaks(Some("E1")).await.data.unwrap();
        assert!(report.verdicts[0].leak);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].created_at, 8_000);
    }

    #[tokio::test]
    async fn test_simulate_leak_without_acoustic_is_partial() {
        let (_, service) = service().await;
        let response = service.simulate_leak("E2").await;
        assert_eq!(response.status, OperationStatus::Partial);
    }

    #[tokio::test]
    async fn test_unknown_asset_is_error_response() {
        let (_, service) = service().await;
        let response = service.reset_asset("nonexistent").await;

        assert_eq!(response.status, OperationStatus::Error);
        assert_eq!(response.error.as_ref().unwrap().kind, "not_found");

        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["status"], json!("error"));
        assert!(encoded.get("data").is_none());
    }

    #[tokio::test]
    async fn test_store_outage_is_error_not_panic() {
        let (store, service) = service().await;
        store.fail_table("sensors");

        let response = service.refresh_all().await;
        assert_eq!(response.status, OperationStatus::Error);
        assert_eq!(response.error.unwrap().kind, "store_failure");
    }

    #[tokio::test]
    async fn test_topology_and_aggregate() {
        let (_, service) = service().await;

        let topo = service.topology().await.data.unwrap();
        assert_eq!(topo.edges.len(), 2);

        let agg = service.aggregate().await.data.unwrap();
        assert_eq!(agg.total, 6);
    }

    #[tokio::test]
    async fn test_dangling_sensor_makes_responses_partial() {
        let (store, service) = service().await;
        store
            .insert(tables::SENSORS, sensor_row("S50", "E404", "pressure", Some(70.0)))
            .await
            .unwrap();

        let listing = service.list_sensors().await;
        assert_eq!(listing.status, OperationStatus::Partial);
        let listing = listing.data.unwrap();
        assert_eq!(listing.count, 6);
        assert_eq!(listing.rejected[0].sensor_id, "S50");
        assert_eq!(listing.rejected[0].kind, "dangling_reference");

        let refresh = service.refresh_all().await;
        assert_eq!(refresh.status, OperationStatus::Partial);
        assert_eq!(refresh.data.unwrap().failed, 1);
        let s50 = service.simulator().topology().sensors().get("S50").await.unwrap();
        assert_eq!((s50.value, s50.last_seen), (Some(70.0), 1_000));

        let agg = service.aggregate().await;
        assert_eq!(agg.status, OperationStatus::Partial);
        let agg = agg.data.unwrap();
        assert_eq!(agg.total, 6);
        assert_eq!(agg.rejected[0].sensor_id, "S50");
    }

    #[tokio::test]
    async fn test_malformed_row_makes_responses_partial() {
        let (store, service) = service().await;
        store
            .insert(tables::SENSORS, sensor_row("S99", "E1", "pressure", Some(-4.0)))
            .await
            .unwrap();

        let refresh = service.refresh_all().await;
        assert_eq!(refresh.status, OperationStatus::Partial);
        let summary = refresh.data.unwrap();
        assert_eq!(summary.updated, 6);
        assert_eq!(summary.failures[0].kind, "malformed_record");
        let s1 = service.simulator().topology().sensors().get("S1").await.unwrap();
        assert_eq!(s1.last_seen, 8_000);

        let leaks = service.evaluate_leaks(None).await;
        assert_eq!(leaks.status, OperationStatus::Partial);
        let leaks = leaks.data.unwrap();
        assert_eq!(leaks.verdicts.len(), 2);
        assert_eq!(leaks.rejected[0].sensor_id, "S99");

        assert_eq!(service.aggregate().await.status, OperationStatus::Partial);
        assert_eq!(service.list_sensors().await.status, OperationStatus::Partial);
    }
}
