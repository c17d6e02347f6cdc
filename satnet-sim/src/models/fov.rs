//! Precomputed field-of-view index and the model that fills and queries it.
//!
//! Per-step visibility computed from geometry dominates runtime; most node
//! pairs are invisible most of the time. Instead, every satellite/ground
//! pair contributes its pass windows once, and a visibility query becomes an
//! interval lookup. The table is shared by every FOV model of a run: writers
//! fill it under one lock (concurrently during precompute), readers arrive
//! after the `preloaded` flag is set.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use satnet_types::{NodeKind, Time};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

// ── The index ─────────────────────────────────────────────────────────────────

/// One contact window between a node and a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRow {
    pub start: Time,
    pub end: Time,
    pub peer_id: u32,
    pub peer_kind: NodeKind,
}

#[derive(Default)]
struct FovTables {
    /// node id → pass rows sorted by start time
    rows: HashMap<u32, Vec<PassRow>>,
    /// pairs already computed, so symmetric fills don't repeat the work
    pair_done: HashMap<u32, HashSet<u32>>,
    /// minimum elevation registered per node, consulted for pair maxima
    min_elevation: HashMap<u32, f64>,
}

/// Run-wide pass-window table. Mutated during the precompute phase, then
/// effectively read-only for the whole run.
#[derive(Default)]
pub struct FovIndex {
    inner: Mutex<FovTables>,
    preloaded: AtomicBool,
}

impl FovIndex {
    pub fn new() -> Arc<FovIndex> {
        Arc::new(FovIndex::default())
    }

    pub fn register_node(&self, node_id: u32, min_elevation_deg: f64) {
        let mut inner = self.inner.lock();
        inner.min_elevation.insert(node_id, min_elevation_deg);
        inner.rows.entry(node_id).or_default();
        inner.pair_done.entry(node_id).or_default();
    }

    pub fn min_elevation(&self, node_id: u32) -> f64 {
        self.inner.lock().min_elevation.get(&node_id).copied().unwrap_or(0.0)
    }

    /// Claim the (a, b) pair for computation. Returns false when some other
    /// filler already took it; racing fillers may still duplicate a pair,
    /// which the query filter tolerates.
    pub fn claim_pair(&self, a: u32, b: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.pair_done.entry(a).or_default().contains(&b) {
            return false;
        }
        inner.pair_done.entry(a).or_default().insert(b);
        inner.pair_done.entry(b).or_default().insert(a);
        true
    }

    /// Insert the symmetric rows for one computed pass.
    pub fn add_pass(
        &self,
        sat_id: u32,
        sat_kind: NodeKind,
        ground_id: u32,
        ground_kind: NodeKind,
        start: Time,
        end: Time,
    ) {
        let mut inner = self.inner.lock();
        for (node, row) in [
            (sat_id, PassRow { start, end, peer_id: ground_id, peer_kind: ground_kind }),
            (ground_id, PassRow { start, end, peer_id: sat_id, peer_kind: sat_kind }),
        ] {
            let rows = inner.rows.entry(node).or_default();
            rows.push(row);
            rows.sort_by_key(|r| r.start);
        }
    }

    /// Peers of `node_id` visible at `t`, filtered by kind.
    pub fn query(&self, node_id: u32, t: Time, kinds: &[NodeKind]) -> Vec<u32> {
        let inner = self.inner.lock();
        let Some(rows) = inner.rows.get(&node_id) else {
            return Vec::new();
        };
        let upper = rows.partition_point(|r| r.start <= t);
        rows[..upper]
            .iter()
            .filter(|r| r.end >= t && kinds.contains(&r.peer_kind))
            .map(|r| r.peer_id)
            .collect()
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded.load(Ordering::Acquire)
    }

    pub fn set_preloaded(&self) {
        self.preloaded.store(true, Ordering::Release);
    }

    /// Persist the node→intervals mapping as an opaque bincode blob.
    pub fn save(&self, path: &Path) -> Result<(), SimError> {
        let inner = self.inner.lock();
        let bytes = bincode::serialize(&inner.rows)?;
        std::fs::write(path, bytes)
            .map_err(|e| SimError::Resource(format!("couldn't write FOV file {path:?}: {e}")))?;
        Ok(())
    }

    /// Install a persisted table verbatim; implies `preloaded`.
    pub fn load(&self, path: &Path) -> Result<(), SimError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SimError::Resource(format!("couldn't read FOV file {path:?}: {e}")))?;
        let rows: HashMap<u32, Vec<PassRow>> = bincode::deserialize(&bytes)?;
        self.inner.lock().rows = rows;
        self.set_preloaded();
        Ok(())
    }
}

// ── The model ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FovArgs {
    min_elevation: f64,
}

/// Time-based field-of-view model: answers visibility queries from the
/// shared pass table, filling it through the orbital models on first use.
pub struct ModelFovTimeBased {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    index: Arc<FovIndex>,
    min_elevation_deg: f64,
}

impl ModelFovTimeBased {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("FOV model lost its owner node".into()))
    }

    fn log_pass(&self, peer: &Node, start: &Time, end: &Time) -> Result<(), SimError> {
        let owner = self.owner()?;
        self.logger.log(
            LogLevel::Info,
            Some(&owner.timestamp()),
            Some(self.name()),
            &format!(
                "Pass. nodeID: {}. nodeType: {}. startTimeUnix: {}. endTimeUnix: {}",
                peer.node_id(),
                peer.kind(),
                start.to_unix_seconds(),
                end.to_unix_seconds()
            ),
        )?;
        Ok(())
    }

    /// Fill the shared table with every pass between this node and the
    /// target kinds over the remaining simulation horizon.
    fn find_passes(&self, target_kinds: &[NodeKind]) -> Result<(), SimError> {
        let owner = self.owner()?;
        let manager = owner.manager()?;
        let topology = manager
            .topology(owner.topology_id())
            .ok_or_else(|| SimError::Dependency("owning topology not found".into()))?;

        let targets: Vec<Arc<Node>> = target_kinds
            .iter()
            .flat_map(|kind| topology.nodes_of_kind(*kind))
            .collect();

        for peer in targets {
            if peer.node_id() == owner.node_id() {
                continue;
            }
            if !self.index.claim_pair(owner.node_id(), peer.node_id()) {
                continue;
            }
            // Either endpoint may be the satellite
            let (sat, ground) = if owner.has_model_with_tag(ModelTag::Orbital) {
                (owner.clone(), peer.clone())
            } else {
                (peer.clone(), owner.clone())
            };
            let min_elevation = self
                .min_elevation_deg
                .max(self.index.min_elevation(peer.node_id()));
            let start = owner.sim_start().max(owner.timestamp());
            let passes = sat
                .call_model_by_tag(
                    ModelTag::Orbital,
                    ModelApi::GetPasses {
                        ground: ground.clone(),
                        start,
                        end: owner.sim_end(),
                        min_elevation_deg: min_elevation,
                    },
                )?
                .into_passes()?;
            for (pass_start, pass_end) in &passes {
                self.log_pass(&peer, pass_start, pass_end)?;
                self.index.add_pass(
                    sat.node_id(),
                    sat.kind(),
                    ground.node_id(),
                    ground.kind(),
                    *pass_start,
                    *pass_end,
                );
            }
        }
        Ok(())
    }

    fn get_view(&self, target_kinds: &[NodeKind], at: Option<Time>) -> Result<Vec<u32>, SimError> {
        let owner = self.owner()?;
        if !self.index.is_preloaded() {
            self.find_passes(target_kinds)?;
        }
        let t = at.unwrap_or_else(|| owner.timestamp());
        Ok(self.index.query(owner.node_id(), t, target_kinds))
    }
}

impl Model for ModelFovTimeBased {
    fn name(&self) -> &'static str {
        "ModelFovTimeBased"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::FieldOfView
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::GetView { target_kinds, at } => {
                Ok(ApiValue::NodeIds(self.get_view(&target_kinds, at)?))
            }
            ModelApi::FindPasses { target_kinds } => {
                self.find_passes(&target_kinds)?;
                Ok(ApiValue::None)
            }
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    index: Arc<FovIndex>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: FovArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelFovTimeBased on node {} needs min_elevation: {e}",
            node.node_id()
        ))
    })?;
    index.register_node(node.node_id(), args.min_elevation);
    Ok(Box::new(ModelFovTimeBased {
        owner: Arc::downgrade(node),
        logger,
        index,
        min_elevation_deg: args.min_elevation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_by_interval_and_kind() {
        let index = FovIndex::new();
        index.register_node(1, 0.0);
        index.register_node(2, 0.0);
        let t0 = Time::from_str("2023-01-01 00:00:00").unwrap();
        index.add_pass(1, NodeKind::Sat, 2, NodeKind::GroundStation, t0.add_seconds(10.0), t0.add_seconds(60.0));

        let visible = index.query(1, t0.add_seconds(30.0), &[NodeKind::GroundStation]);
        assert_eq!(visible, vec![2]);
        assert!(index.query(1, t0, &[NodeKind::GroundStation]).is_empty());
        assert!(index.query(1, t0.add_seconds(61.0), &[NodeKind::GroundStation]).is_empty());
        assert!(index.query(1, t0.add_seconds(30.0), &[NodeKind::IotDevice]).is_empty());
        // Symmetric row exists for the ground peer
        assert_eq!(index.query(2, t0.add_seconds(30.0), &[NodeKind::Sat]), vec![1]);
    }

    #[test]
    fn pair_claim_is_one_shot_and_symmetric() {
        let index = FovIndex::new();
        index.register_node(1, 0.0);
        index.register_node(2, 0.0);
        assert!(index.claim_pair(1, 2));
        assert!(!index.claim_pair(1, 2));
        assert!(!index.claim_pair(2, 1));
    }

    #[test]
    fn save_load_round_trip() {
        let index = FovIndex::new();
        index.register_node(7, 5.0);
        let t0 = Time::from_str("2023-01-01 00:00:00").unwrap();
        index.add_pass(7, NodeKind::Sat, 9, NodeKind::IotDevice, t0, t0.add_seconds(120.0));

        let path = std::env::temp_dir().join(format!("satnet-fov-{}.bin", std::process::id()));
        index.save(&path).unwrap();

        let restored = FovIndex::new();
        restored.load(&path).unwrap();
        assert!(restored.is_preloaded());
        assert_eq!(restored.query(7, t0.add_seconds(60.0), &[NodeKind::IotDevice]), vec![9]);
        assert_eq!(restored.query(9, t0.add_seconds(60.0), &[NodeKind::Sat]), vec![7]);
        let _ = std::fs::remove_file(&path);
    }
}
