//! TopologyGraph - read-only view over nodes and edges.
//!
//! Resolves asset identity, edge name lookups and display names. Nodes and
//! edges are immutable inputs, so every call reads a fresh snapshot from the
//! store rather than caching.

use aware_env::{Filter, RecordStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::error::{Result, TelemetryError};
use crate::model::{decode_all, tables, Asset, AssetType, Edge, Entity, Node, Sensor};
use crate::retry::with_retry;
use crate::sensor_store::{SensorScan, SensorStore};

/// Nodes and edges as read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Id-keyed lookup tables built from a snapshot.
#[derive(Debug, Clone, Default)]
pub struct AssetIndex {
    pub nodes: HashMap<String, Node>,
    pub edges: HashMap<String, Edge>,
}

impl AssetIndex {
    /// Edge name, then node name; `None` when the id resolves to neither.
    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.edges
            .get(id)
            .map(|e| e.name.as_str())
            .or_else(|| self.nodes.get(id).map(|n| n.name.as_str()))
    }

    pub fn asset_type_of(&self, id: &str) -> Option<AssetType> {
        if self.edges.contains_key(id) {
            Some(AssetType::Edge)
        } else if self.nodes.contains_key(id) {
            Some(AssetType::Node)
        } else {
            None
        }
    }
}

/// Graph view over the store's `nodes` and `edges` tables.
///
/// Also owns the `SensorStore` for the same backend, since most asset
/// queries end in a sensor listing.
pub struct TopologyGraph<St: RecordStore> {
    store: Arc<St>,
    retry: RetryPolicy,
    sensors: SensorStore<St>,
}

impl<St: RecordStore> TopologyGraph<St> {
    pub fn new(store: Arc<St>, retry: RetryPolicy) -> Self {
        let sensors = SensorStore::new(Arc::clone(&store), retry.clone());
        Self { store, retry, sensors }
    }

    pub fn sensors(&self) -> &SensorStore<St> {
        &self.sensors
    }

    pub fn store(&self) -> &Arc<St> {
        &self.store
    }

    async fn load<T: Entity>(&self, filter: &Filter, what: &str) -> Result<Vec<T>> {
        let records = with_retry(&self.retry, what, || self.store.query(T::TABLE, filter)).await?;
        decode_all(&records)
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.load(&Filter::All, "list nodes").await
    }

    pub async fn edges(&self) -> Result<Vec<Edge>> {
        self.load(&Filter::All, "list edges").await
    }

    /// Exact, case-sensitive lookup of an edge by its human name.
    ///
    /// # Returns
    /// * `Err(NotFound)` - no edge carries that name
    /// * `Err(AmbiguousReference)` - more than one edge does
    pub async fn find_edge_by_name(&self, name: &str) -> Result<Edge> {
        let mut matches: Vec<Edge> = self.load(&Filter::eq("name", name), "find edge by name").await?;
        match matches.len() {
            0 => Err(TelemetryError::not_found("edge", name)),
            1 => Ok(matches.remove(0)),
            count => Err(TelemetryError::AmbiguousReference {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Looks up an asset of a known type.
    pub async fn find_asset_by_id(&self, id: &str, asset_type: AssetType) -> Result<Asset> {
        let filter = Filter::eq("id", id);
        let asset = match asset_type {
            AssetType::Node => self
                .load::<Node>(&filter, "find node")
                .await?
                .into_iter()
                .next()
                .map(Asset::Node),
            AssetType::Edge => self
                .load::<Edge>(&filter, "find edge")
                .await?
                .into_iter()
                .next()
                .map(Asset::Edge),
        };
        asset.ok_or_else(|| TelemetryError::not_found(asset_type.as_str(), id))
    }

    /// Looks up an asset of either type, edges first.
    pub async fn resolve_asset(&self, id: &str) -> Result<Asset> {
        match self.find_asset_by_id(id, AssetType::Edge).await {
            Err(TelemetryError::NotFound { .. }) => self
                .find_asset_by_id(id, AssetType::Node)
                .await
                .map_err(|e| match e {
                    TelemetryError::NotFound { .. } => TelemetryError::not_found("asset", id),
                    other => other,
                }),
            other => other,
        }
    }

    /// Sensors mounted on an existing asset, in insertion order.
    pub async fn list_sensors_for_asset(&self, asset_id: &str) -> Result<Vec<Sensor>> {
        self.resolve_asset(asset_id).await?;
        self.sensors.list_by_asset(asset_id).await
    }

    /// Nodes and edges, with every edge endpoint checked.
    pub async fn snapshot(&self) -> Result<NetworkSnapshot> {
        let nodes = self.nodes().await?;
        let edges = self.edges().await?;

        for edge in &edges {
            for endpoint in [&edge.from_node, &edge.to_node] {
                if !nodes.iter().any(|n| &n.id == endpoint) {
                    return Err(TelemetryError::DanglingReference {
                        from: format!("edge {}", edge.id),
                        asset_type: AssetType::Node,
                        asset_id: endpoint.clone(),
                    });
                }
            }
        }

        Ok(NetworkSnapshot { nodes, edges })
    }

    pub async fn asset_index(&self) -> Result<AssetIndex> {
        let nodes = self.nodes().await?;
        let edges = self.edges().await?;
        Ok(AssetIndex {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges: edges.into_iter().map(|e| (e.id.clone(), e)).collect(),
        })
    }

    /// Every sensor whose row decodes and whose asset resolves, with the
    /// rest reported in `rejected`. Also returns the index it resolved
    /// against.
    pub async fn resolved_sensors(&self) -> Result<(SensorScan, AssetIndex)> {
        let scan = self.sensors.scan_all().await?;
        let index = self.asset_index().await?;
        Ok((scan.reject_dangling(&index), index))
    }

    /// Edge name or node name for `id`.
    pub async fn display_name(&self, id: &str) -> Result<Option<String>> {
        let index = self.asset_index().await?;
        Ok(index.display_name(id).map(str::to_string))
    }
}
