//! Aggregator - counts, groupings and name joins for dashboards.

use aware_env::RecordStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{AssetType, Sensor, SensorKind};
use crate::sensor_store::{group_by_asset_ordered, SensorFailure};
use crate::topology::TopologyGraph;

/// Display name used when an asset id resolves to nothing.
pub const UNKNOWN_ASSET: &str = "Unknown";

/// One asset's line in the counts report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSummary {
    pub asset_id: String,
    pub asset_type: AssetType,
    pub name: String,
    pub sensor_types: Vec<SensorKind>,
}

/// The "check counts" report.
///
/// Counts cover only sensors that decode and resolve; the others are
/// listed in `rejected`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub total: usize,
    pub by_asset_type: BTreeMap<AssetType, usize>,
    pub assets: Vec<AssetSummary>,
    pub rejected: Vec<SensorFailure>,
}

/// Read-side views over sensors joined with topology.
pub struct Aggregator<St: RecordStore> {
    topology: Arc<TopologyGraph<St>>,
}

impl<St: RecordStore> Aggregator<St> {
    pub fn new(topology: Arc<TopologyGraph<St>>) -> Self {
        Self { topology }
    }

    /// Number of sensors per asset type. Types with no sensors are absent.
    pub async fn count_by_asset_type(&self) -> Result<BTreeMap<AssetType, usize>> {
        let (scan, _) = self.topology.resolved_sensors().await?;
        Ok(count_by_type(&scan.sensors))
    }

    /// Sensor kinds present on each asset, in first-seen order.
    pub async fn group_by_asset(&self) -> Result<BTreeMap<String, Vec<SensorKind>>> {
        let (scan, _) = self.topology.resolved_sensors().await?;
        Ok(group_by_asset_ordered(&scan.sensors)
            .into_iter()
            .map(|(asset_id, members)| (asset_id, distinct_kinds(&members)))
            .collect())
    }

    /// Display name for each id, `"Unknown"` when it does not resolve.
    pub async fn resolve_asset_names<S: AsRef<str>>(&self, ids: &[S]) -> Result<BTreeMap<String, String>> {
        let index = self.topology.asset_index().await?;
        Ok(ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                let name = index.display_name(id).unwrap_or(UNKNOWN_ASSET);
                (id.to_string(), name.to_string())
            })
            .collect())
    }

    /// One reading per kind on the asset: the most recent `last_seen`,
    /// first-inserted on ties. Kinds keep first-seen order.
    pub async fn latest_by_type(&self, asset_id: &str) -> Result<Vec<Sensor>> {
        let sensors = self.topology.list_sensors_for_asset(asset_id).await?;

        let mut latest: Vec<Sensor> = Vec::new();
        for sensor in sensors {
            match latest.iter_mut().find(|s| s.kind == sensor.kind) {
                Some(current) if sensor.last_seen > current.last_seen => *current = sensor,
                Some(_) => {}
                None => latest.push(sensor),
            }
        }
        Ok(latest)
    }

    /// Totals, per-type counts and per-asset sensor kinds in one pass.
    pub async fn report(&self) -> Result<AggregateReport> {
        let (scan, index) = self.topology.resolved_sensors().await?;
        let sensors = scan.sensors;

        let assets = group_by_asset_ordered(&sensors)
            .into_iter()
            .map(|(asset_id, members)| {
                let asset_type = members[0].asset_type;
                let name = index.display_name(&asset_id).unwrap_or(UNKNOWN_ASSET).to_string();
                AssetSummary {
                    sensor_types: distinct_kinds(&members),
                    asset_id,
                    asset_type,
                    name,
                }
            })
            .collect();

        Ok(AggregateReport {
            total: sensors.len(),
            by_asset_type: count_by_type(&sensors),
            assets,
            rejected: scan.rejected,
        })
    }
}

fn count_by_type(sensors: &[Sensor]) -> BTreeMap<AssetType, usize> {
    let mut counts = BTreeMap::new();
    for sensor in sensors {
        *counts.entry(sensor.asset_type).or_insert(0) += 1;
    }
    counts
}

fn distinct_kinds(members: &[&Sensor]) -> Vec<SensorKind> {
    let mut kinds: Vec<SensorKind> = Vec::new();
    for sensor in members {
        if !kinds.contains(&sensor.kind) {
            kinds.push(sensor.kind.clone());
        }
    }
    kinds
}
