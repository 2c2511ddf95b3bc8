//! Provisioning of nodes, edges and sensors.
//!
//! Sensors are provisioned once per asset and then only mutated, so this is
//! the single place new rows enter the store.

use aware_env::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{BaselineConfig, RetryPolicy};
use crate::error::{Result, TelemetryError};
use crate::model::{AssetType, Edge, Entity, Node, Sensor, SensorKind};
use crate::retry::with_retry;
use crate::topology::TopologyGraph;

/// Acoustic value a newly mounted edge sensor starts from (dB).
pub const PROVISION_ACOUSTIC: f64 = 2.5;

/// Outcome of one item in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Inserted { sensor: Sensor },
    Rejected { kind: String, error: String },
}

impl ItemOutcome {
    fn from_result(result: Result<Sensor>) -> Self {
        match result {
            Ok(sensor) => ItemOutcome::Inserted { sensor },
            Err(e) => ItemOutcome::Rejected {
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, ItemOutcome::Inserted { .. })
    }
}

/// Result of `add_edge_sensors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeProvisioning {
    pub edge: Edge,
    pub outcomes: Vec<ItemOutcome>,
}

/// Inserts topology and sensors, checking references before writing.
pub struct Provisioner<St: RecordStore> {
    topology: Arc<TopologyGraph<St>>,
    retry: RetryPolicy,
    baseline: BaselineConfig,
}

impl<St: RecordStore> Provisioner<St> {
    pub fn new(topology: Arc<TopologyGraph<St>>, retry: RetryPolicy, baseline: BaselineConfig) -> Self {
        Self {
            topology,
            retry,
            baseline,
        }
    }

    async fn insert_entity<T: Entity>(&self, entity: &T, what: &str) -> Result<T> {
        entity
            .check()
            .map_err(|reason| TelemetryError::malformed(T::TABLE, reason))?;
        let record = entity.to_record()?;
        let stored = with_retry(&self.retry, what, || {
            self.topology.store().insert(T::TABLE, record.clone())
        })
        .await?;
        T::from_record(&stored)
    }

    pub async fn insert_node(&self, node: Node) -> Result<Node> {
        self.insert_entity(&node, "insert node").await
    }

    /// Inserts an edge whose endpoints already exist.
    ///
    /// # Returns
    /// * `Err(DanglingReference)` - an endpoint is not a known node
    pub async fn insert_edge(&self, edge: Edge) -> Result<Edge> {
        for endpoint in [&edge.from_node, &edge.to_node] {
            match self.topology.find_asset_by_id(endpoint, AssetType::Node).await {
                Ok(_) => {}
                Err(TelemetryError::NotFound { .. }) => {
                    return Err(TelemetryError::DanglingReference {
                        from: format!("edge {}", edge.id),
                        asset_type: AssetType::Node,
                        asset_id: endpoint.clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        self.insert_entity(&edge, "insert edge").await
    }

    /// Inserts sensors one by one; a rejected item does not stop the rest.
    ///
    /// Each sensor's asset must resolve, and a batch that cannot read the
    /// topology at all fails as a whole.
    pub async fn insert_batch(&self, sensors: Vec<Sensor>) -> Result<Vec<ItemOutcome>> {
        let index = self.topology.asset_index().await?;
        let mut outcomes = Vec::with_capacity(sensors.len());

        for sensor in sensors {
            let known = match sensor.asset_type {
                AssetType::Node => index.nodes.contains_key(&sensor.asset_id),
                AssetType::Edge => index.edges.contains_key(&sensor.asset_id),
            };
            let result = if known {
                self.topology.sensors().insert(sensor).await
            } else {
                Err(TelemetryError::DanglingReference {
                    from: format!("new {} sensor", sensor.kind),
                    asset_type: sensor.asset_type,
                    asset_id: sensor.asset_id.clone(),
                })
            };
            if let Err(e) = &result {
                warn!("provision: {}", e);
            }
            outcomes.push(ItemOutcome::from_result(result));
        }

        Ok(outcomes)
    }

    /// Mounts a pressure sensor (at baseline) and an acoustic sensor on the
    /// edge called `edge_name`.
    ///
    /// # Returns
    /// * `Err(NotFound)` / `Err(AmbiguousReference)` - the name does not pick
    ///   out exactly one edge; nothing is inserted
    pub async fn add_edge_sensors(&self, edge_name: &str, now_ms: u64) -> Result<EdgeProvisioning> {
        let edge = self.topology.find_edge_by_name(edge_name).await?;

        let sensors = vec![
            Sensor::provision(&edge.id, AssetType::Edge, SensorKind::Pressure, Some(self.baseline.pressure), now_ms),
            Sensor::provision(&edge.id, AssetType::Edge, SensorKind::Acoustic, Some(PROVISION_ACOUSTIC), now_ms),
        ];

        let outcomes = self.insert_batch(sensors).await?;
        let inserted = outcomes.iter().filter(|o| o.is_inserted()).count();
        info!("provisioned {}/{} sensors on {} ({})", inserted, outcomes.len(), edge.name, edge.id);

        Ok(EdgeProvisioning { edge, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tables;
    use crate::testing::seed_store;
    use aware_env::{MemoryStore, RecordStore};
    use serde_json::json;

    async fn provisioner() -> (Arc<MemoryStore>, Provisioner<MemoryStore>) {
        let store = seed_store().await;
        let topology = Arc::new(TopologyGraph::new(Arc::clone(&store), RetryPolicy::no_retry()));
        let provisioner = Provisioner::new(topology, RetryPolicy::no_retry(), BaselineConfig::default());
        (store, provisioner)
    }

    #[tokio::test]
    async fn test_add_edge_sensors_by_name() {
        let (store, provisioner) = provisioner().await;

        let result = provisioner.add_edge_sensors("P2", 7_000).await.unwrap();
        assert_eq!(result.edge.id, "E2");
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes.iter().all(ItemOutcome::is_inserted));

        let rows = store.rows(tables::SENSORS);
        assert_eq!(rows.len(), 8);
        let acoustic = rows
            .iter()
            .find(|r| r["asset_id"] == json!("E2") && r["type"] == json!("acoustic"))
            .unwrap();
        assert_eq!(acoustic["value"], json!(2.5));
        assert_eq!(acoustic["unit"], json!("dB"));
        assert_eq!(acoustic["last_seen"], json!(7_000u64));
    }

    #[tokio::test]
    async fn test_add_edge_sensors_unknown_or_ambiguous_name() {
        let (store, provisioner) = provisioner().await;

        let err = provisioner.add_edge_sensors("P9", 0).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let dup = json!({"id": "E3", "name": "P2", "from_node": "N1", "to_node": "N3"});
        store
            .insert(tables::EDGES, dup.as_object().cloned().unwrap())
            .await
            .unwrap();
        let err = provisioner.add_edge_sensors("P2", 0).await.unwrap_err();
        assert_eq!(err.kind(), "ambiguous_reference");
        assert_eq!(store.rows(tables::SENSORS).len(), 6);
    }

    #[tokio::test]
    async fn test_insert_batch_reports_per_item() {
        let (_, provisioner) = provisioner().await;
        let batch = vec![
            Sensor::provision("E2", AssetType::Edge, SensorKind::Acoustic, Some(2.0), 0),
            Sensor::provision("E404", AssetType::Edge, SensorKind::Flow, Some(80.0), 0),
            Sensor::provision("E1", AssetType::Edge, SensorKind::Flow, Some(80.0), 0).with_id("S1"),
        ];

        let outcomes = provisioner.insert_batch(batch).await.unwrap();
        assert!(outcomes[0].is_inserted());
        assert!(matches!(&outcomes[1], ItemOutcome::Rejected { kind, .. } if kind == "dangling_reference"));
        assert!(matches!(&outcomes[2], ItemOutcome::Rejected { kind, .. } if kind == "duplicate_key"));
    }

    #[tokio::test]
    async fn test_insert_edge_checks_endpoints() {
        let (_, provisioner) = provisioner().await;
        let edge = Edge {
            id: "E5".into(),
            name: "P5".into(),
            from_node: "N1".into(),
            to_node: "N8".into(),
            material: None,
            diameter: Some(150.0),
        };

        let err = provisioner.insert_edge(edge.clone()).await.unwrap_err();
        assert!(matches!(err, TelemetryError::DanglingReference { ref asset_id, .. } if asset_id == "N8"));

        let ok = Edge { to_node: "N3".into(), ..edge };
        assert_eq!(provisioner.insert_edge(ok).await.unwrap().id, "E5");
    }
}
