//! Seeded demo network used by the scenarios.
//!
//! A chain of junctions fed from a reservoir, one pipe between each pair.
//! Every pipe carries pressure, flow and acoustic sensors except the last,
//! which has no acoustic sensor, and one junction carries a level sensor
//! with no reading. Initial values are drawn from the normal operating
//! bands, so a fresh network reports no leaks.

use aware_core::provision::ItemOutcome;
use aware_core::{AssetType, Edge, Node, Provisioner, Result, Sensor, SensorKind, TelemetryError};
use aware_env::RecordStore;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Normal operating bands (dashboard values).
pub const PRESSURE_BAND: (f64, f64) = (60.0, 70.0);
pub const FLOW_BAND: (f64, f64) = (80.0, 100.0);
pub const ACOUSTIC_BAND: (f64, f64) = (2.0, 2.5);

/// Ids of what `seed_demo_network` created.
#[derive(Debug, Clone, Default)]
pub struct DemoNetwork {
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
    /// The pipe without an acoustic sensor
    pub partial_edge: String,
    pub sensor_count: usize,
}

/// Builds the demo topology through `provisioner`.
///
/// # Arguments
/// * `pipes` - number of pipes (at least 2)
/// * `seed` - seeds the initial readings
/// * `now_ms` - `last_seen` for every provisioned sensor
pub async fn seed_demo_network<St: RecordStore>(
    provisioner: &Provisioner<St>,
    pipes: usize,
    seed: u64,
    now_ms: u64,
) -> Result<DemoNetwork> {
    let pipes = pipes.max(2);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut network = DemoNetwork::default();

    for i in 0..=pipes {
        let (name, kind) = if i == 0 {
            ("Reservoir".to_string(), "source")
        } else if i == pipes {
            (format!("Tank {}", i), "tank")
        } else {
            (format!("Junction {}", i), "junction")
        };
        let node = Node {
            id: format!("N{}", i + 1),
            name,
            kind: kind.to_string(),
            latitude: 40.70 + i as f64 * 0.002,
            longitude: -74.00 - i as f64 * 0.002,
        };
        network.node_ids.push(provisioner.insert_node(node).await?.id);
    }

    let mut sensors = Vec::new();
    for i in 0..pipes {
        let edge = Edge {
            id: format!("E{}", i + 1),
            name: format!("P{}", i + 1),
            from_node: network.node_ids[i].clone(),
            to_node: network.node_ids[i + 1].clone(),
            material: Some(if i % 2 == 0 { "PVC" } else { "ductile iron" }.to_string()),
            diameter: Some(if i == 0 { 300.0 } else { 200.0 }),
        };
        let edge = provisioner.insert_edge(edge).await?;

        let mut mount = |kind: SensorKind, band: (f64, f64)| {
            let value = rng.gen_range(band.0..=band.1);
            Sensor::provision(&edge.id, AssetType::Edge, kind, Some(value), now_ms)
        };
        sensors.push(mount(SensorKind::Pressure, PRESSURE_BAND));
        sensors.push(mount(SensorKind::Flow, FLOW_BAND));
        if i + 1 < pipes {
            sensors.push(mount(SensorKind::Acoustic, ACOUSTIC_BAND));
        } else {
            network.partial_edge = edge.id.clone();
        }
        network.edge_ids.push(edge.id);
    }

    sensors.push(Sensor::provision(
        &network.node_ids[1],
        AssetType::Node,
        SensorKind::from("level"),
        None,
        now_ms,
    ));

    let outcomes = provisioner.insert_batch(sensors).await?;
    if let Some(ItemOutcome::Rejected { error, .. }) = outcomes.iter().find(|o| !o.is_inserted()) {
        return Err(TelemetryError::malformed("sensors", format!("demo sensor rejected: {}", error)));
    }
    network.sensor_count = outcomes.len();

    debug!(
        "demo network: {} nodes, {} pipes, {} sensors (seed={})",
        network.node_ids.len(),
        network.edge_ids.len(),
        network.sensor_count,
        seed
    );
    Ok(network)
}
