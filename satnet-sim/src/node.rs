//! The node container: one simulated entity, its clock, its position store
//! and its ordered list of models.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use satnet_types::{Location, NodeKind, Time};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::net::device::RadioDevice;
use crate::net::link::RadioFamily;
use crate::sim::manager::Manager;

/// One installed model: the lock plus the identity read without locking.
pub struct ModelSlot {
    pub name: &'static str,
    pub tag: ModelTag,
    pub model: Mutex<Box<dyn Model>>,
}

/// A radio handle registered at install time so that peers can discover
/// devices without touching this node's model locks.
pub struct RadioPort {
    pub model_name: &'static str,
    pub family: RadioFamily,
    pub device: Arc<RadioDevice>,
}

enum PositionStore {
    /// Ground entities never move
    Fixed(Location),
    /// Satellites: positions computed per timestamp, filled on demand
    Timed(Mutex<HashMap<i64, Location>>),
}

/// A uniquely-id'd entity within a topology.
///
/// Shared as `Arc<Node>`; all mutable state sits behind its own lock so a
/// node can be executed by one worker while peers read its clock, position
/// or radio ports.
pub struct Node {
    iname: &'static str,
    kind: NodeKind,
    node_id: u32,
    topology_id: u32,
    sim_start: Time,
    sim_end: Time,
    delta_s: f64,
    clock: Mutex<Time>,
    positions: PositionStore,
    tle: Option<[String; 2]>,
    geodetic: Option<(f64, f64, f64)>,
    logger: Arc<Logger>,
    models: OnceLock<Vec<ModelSlot>>,
    tag_index: OnceLock<HashMap<ModelTag, usize>>,
    radio_ports: OnceLock<Vec<RadioPort>>,
    manager: OnceLock<Weak<Manager>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.node_id)
            .field("kind", &self.kind)
            .field("iname", &self.iname)
            .finish_non_exhaustive()
    }
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new_satellite(
        node_id: u32,
        topology_id: u32,
        tle_1: String,
        tle_2: String,
        delta_s: f64,
        start: Time,
        end: Time,
        logger: Arc<Logger>,
    ) -> Arc<Node> {
        Arc::new(Node {
            iname: "SatelliteBasic",
            kind: NodeKind::Sat,
            node_id,
            topology_id,
            sim_start: start,
            sim_end: end,
            delta_s,
            clock: Mutex::new(start),
            positions: PositionStore::Timed(Mutex::new(HashMap::new())),
            tle: Some([tle_1, tle_2]),
            geodetic: None,
            logger,
            models: OnceLock::new(),
            tag_index: OnceLock::new(),
            radio_ports: OnceLock::new(),
            manager: OnceLock::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_ground(
        iname: &'static str,
        kind: NodeKind,
        node_id: u32,
        topology_id: u32,
        location: Location,
        delta_s: f64,
        start: Time,
        end: Time,
        logger: Arc<Logger>,
    ) -> Arc<Node> {
        let geodetic = location.to_lat_lon();
        Arc::new(Node {
            iname,
            kind,
            node_id,
            topology_id,
            sim_start: start,
            sim_end: end,
            delta_s,
            clock: Mutex::new(start),
            positions: PositionStore::Fixed(location),
            tle: None,
            geodetic: Some(geodetic),
            logger,
            models: OnceLock::new(),
            tag_index: OnceLock::new(),
            radio_ports: OnceLock::new(),
            manager: OnceLock::new(),
        })
    }

    // ── Identity ──────────────────────────────────────────────────────────

    pub fn iname(&self) -> &'static str {
        self.iname
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn topology_id(&self) -> u32 {
        self.topology_id
    }

    pub fn sim_start(&self) -> Time {
        self.sim_start
    }

    pub fn sim_end(&self) -> Time {
        self.sim_end
    }

    pub fn delta_s(&self) -> f64 {
        self.delta_s
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn tle(&self) -> Option<&[String; 2]> {
        self.tle.as_ref()
    }

    /// `(lat_deg, lon_deg, elev_m)` for ground entities.
    pub fn geodetic(&self) -> Option<(f64, f64, f64)> {
        self.geodetic
    }

    // ── Clock and position ────────────────────────────────────────────────

    /// The node's own cursor into simulated time.
    pub fn timestamp(&self) -> Time {
        *self.clock.lock()
    }

    pub fn update_position(&self, location: Location, time: Time) {
        match &self.positions {
            PositionStore::Fixed(_) => {}
            PositionStore::Timed(map) => {
                map.lock().insert(time.as_micros(), location);
            }
        }
    }

    /// Position at `at` (default: the node's current timestamp). Satellite
    /// positions missing from the history are computed through the orbital
    /// model on demand.
    pub fn get_position(&self, at: Option<Time>) -> Result<Location, SimError> {
        let at = at.unwrap_or_else(|| self.timestamp());
        match &self.positions {
            PositionStore::Fixed(loc) => Ok(*loc),
            PositionStore::Timed(map) => {
                if let Some(loc) = map.lock().get(&at.as_micros()) {
                    return Ok(*loc);
                }
                match self.try_call_model_by_tag(ModelTag::Orbital, ModelApi::GetPosition { time: at })? {
                    Some(ApiValue::Position(loc)) => Ok(loc),
                    _ => Err(SimError::Dependency(format!(
                        "position not found for node {} at {at}",
                        self.node_id
                    ))),
                }
            }
        }
    }

    // ── Models ────────────────────────────────────────────────────────────

    /// Attach the validated model list. Called once by the orchestrator;
    /// the set is frozen afterwards.
    pub fn install_models(&self, models: Vec<Box<dyn Model>>) -> Result<(), SimError> {
        let mut slots = Vec::with_capacity(models.len());
        let mut tag_index: HashMap<ModelTag, usize> = HashMap::new();
        let mut ports = Vec::new();
        for (idx, model) in models.into_iter().enumerate() {
            let (name, tag) = (model.name(), model.tag());
            tag_index.entry(tag).or_insert(idx);
            slots.push(ModelSlot {
                name,
                tag,
                model: Mutex::new(model),
            });
        }
        for slot in &slots {
            if slot.tag == ModelTag::Radio {
                let device = slot
                    .model
                    .lock()
                    .dispatch(ModelApi::GetRadioDevice)?
                    .into_device()?;
                ports.push(RadioPort {
                    model_name: slot.name,
                    family: device.family(),
                    device,
                });
            }
        }
        self.models
            .set(slots)
            .map_err(|_| SimError::Config(format!("models already installed on node {}", self.node_id)))?;
        let _ = self.tag_index.set(tag_index);
        let _ = self.radio_ports.set(ports);
        Ok(())
    }

    pub fn models(&self) -> &[ModelSlot] {
        self.models.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn radio_ports(&self) -> &[RadioPort] {
        self.radio_ports.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_model_with_tag(&self, tag: ModelTag) -> bool {
        self.tag_index.get().is_some_and(|idx| idx.contains_key(&tag))
    }

    pub fn has_model_with_name(&self, name: &str) -> bool {
        self.models().iter().any(|s| s.name == name)
    }

    /// Dispatch to the first-installed model carrying `tag`; `Ok(None)` when
    /// the node has no such model.
    pub fn try_call_model_by_tag(
        &self,
        tag: ModelTag,
        api: ModelApi,
    ) -> Result<Option<ApiValue>, SimError> {
        let Some(&idx) = self.tag_index.get().and_then(|m| m.get(&tag)) else {
            return Ok(None);
        };
        let slot = &self.models()[idx];
        slot.model.lock().dispatch(api).map(Some)
    }

    pub fn call_model_by_tag(&self, tag: ModelTag, api: ModelApi) -> Result<ApiValue, SimError> {
        self.try_call_model_by_tag(tag, api)?.ok_or_else(|| {
            SimError::Dependency(format!(
                "node {} has no model with tag {tag:?}",
                self.node_id
            ))
        })
    }

    pub fn call_model_by_name(&self, name: &str, api: ModelApi) -> Result<ApiValue, SimError> {
        let slot = self
            .models()
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                SimError::Dependency(format!("node {} has no model named {name}", self.node_id))
            })?;
        slot.model.lock().dispatch(api)
    }

    // ── Manager wiring ────────────────────────────────────────────────────

    pub fn set_manager(&self, manager: Weak<Manager>) {
        let _ = self.manager.set(manager);
    }

    pub fn manager(&self) -> Result<Arc<Manager>, SimError> {
        self.manager
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| SimError::Dependency(format!("node {} has no manager", self.node_id)))
    }

    // ── Step execution ────────────────────────────────────────────────────

    /// Run every model once in configured order, then advance this node's
    /// clock by Δ. Returns `Ok(false)` once the clock has passed the
    /// simulation end.
    pub fn execute(&self) -> Result<bool, SimError> {
        let now = self.timestamp();
        if now > self.sim_end {
            return Ok(false);
        }
        self.logger.log(LogLevel::Debug, Some(&now), None, "Executing")?;
        for slot in self.models() {
            slot.model.lock().execute()?;
        }
        *self.clock.lock() = now.add_seconds(self.delta_s);
        Ok(true)
    }
}
