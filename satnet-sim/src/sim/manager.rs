//! The runtime core: the step loop, the worker fan-out, the pause gate and
//! the name-addressed runtime API.
//!
//! The loop runs on whichever thread calls [`Manager::run_sim`]; an external
//! controller talks to it from other threads through `pause_at_step` /
//! `resume` and the inspection calls. Worker parallelism exists within one
//! step only: the pool barrier guarantees no node starts step `i+1` before
//! every node finished step `i`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use tracing::{error, info, warn};

use satnet_types::{reset_id_counters, Location, NodeKind, Time};

use crate::error::SimError;
use crate::model::{ApiValue, ModelApi};
use crate::models::fov::FovIndex;
use crate::node::Node;
use crate::topology::Topology;

// ── Pause gate primitives ─────────────────────────────────────────────────────

/// A one-shot, resettable signal: the simulator sets it when the armed step
/// is reached, external callers block on it.
pub struct Event {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    fn new() -> Arc<Event> {
        Arc::new(Event {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub fn set(&self) {
        *self.flag.lock() = true;
        self.cv.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Block until the event is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cv.wait(&mut flag);
        }
    }
}

// ── Runtime API values ────────────────────────────────────────────────────────

/// Result of a name-addressed runtime API call: a value, a wait-token, or
/// nothing.
pub enum RuntimeValue {
    None,
    Time(Time),
    Position(Location),
    /// Wait on this token; it fires when the armed pause step is reached
    Token(Arc<Event>),
    TopologyIds(Vec<u32>),
    Api(ApiValue),
}

// ── Manager ───────────────────────────────────────────────────────────────────

pub struct Manager {
    topologies: Vec<Topology>,
    all_nodes: Vec<Arc<Node>>,
    num_steps: u64,
    current_step: AtomicU64,
    stop_step: Mutex<Option<u64>>,
    paused: Arc<Event>,
    resume_gate: Arc<Event>,
    pool: Option<rayon::ThreadPool>,
    fov: Arc<FovIndex>,
}

impl Manager {
    pub fn new(
        topologies: Vec<Topology>,
        num_steps: u64,
        workers: usize,
        fov: Arc<FovIndex>,
    ) -> Result<Arc<Manager>, SimError> {
        let pool = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| SimError::Resource(format!("couldn't build worker pool: {e}")))?,
            )
        } else {
            None
        };
        let all_nodes: Vec<Arc<Node>> = topologies
            .iter()
            .flat_map(|t| t.nodes().iter().cloned())
            .collect();
        let manager = Arc::new(Manager {
            topologies,
            all_nodes,
            num_steps,
            current_step: AtomicU64::new(0),
            stop_step: Mutex::new(None),
            paused: Event::new(),
            resume_gate: Event::new(),
            pool,
            fov,
        });
        for node in &manager.all_nodes {
            node.set_manager(Arc::downgrade(&manager));
        }
        // Replays of the same configuration mint the same unit ids
        reset_id_counters();
        Ok(manager)
    }

    pub fn topologies(&self) -> &[Topology] {
        &self.topologies
    }

    pub fn topology(&self, id: u32) -> Option<&Topology> {
        self.topologies.iter().find(|t| t.id() == id)
    }

    pub fn num_steps(&self) -> u64 {
        self.num_steps
    }

    pub fn current_step(&self) -> u64 {
        self.current_step.load(Ordering::Acquire)
    }

    pub fn fov_index(&self) -> &Arc<FovIndex> {
        &self.fov
    }

    fn node(&self, topology_id: u32, node_id: u32) -> Result<Arc<Node>, SimError> {
        self.topology(topology_id)
            .and_then(|t| t.node(node_id).cloned())
            .ok_or_else(|| {
                SimError::Api(format!(
                    "node {node_id} not found in topology {topology_id}"
                ))
            })
    }

    // ── Step loop ─────────────────────────────────────────────────────────

    /// Drive the simulation to completion. Nodes stay in lockstep: each
    /// step ends with a barrier over every node's execution.
    pub fn run_sim(&self) -> Result<(), SimError> {
        while self.current_step() < self.num_steps {
            let step = self.current_step();

            // One-shot pause gate: release the waiting controller, block
            // until it resumes us.
            if *self.stop_step.lock() == Some(step) {
                self.paused.set();
                self.resume_gate.wait();
                self.resume_gate.clear();
            }

            if step % 60 == 0 {
                info!(step, "running simulation step");
            }

            let result: Result<(), SimError> = match &self.pool {
                Some(pool) => pool.install(|| {
                    self.all_nodes
                        .par_iter()
                        .try_for_each(|node| node.execute().map(drop))
                }),
                None => self
                    .all_nodes
                    .iter()
                    .try_for_each(|node| node.execute().map(drop)),
            };
            if let Err(e) = result {
                error!(step, error = %e, "node execution failed; aborting run");
                return Err(e);
            }

            self.current_step.fetch_add(1, Ordering::AcqRel);
        }
        // Release any controller still blocked on the pause token
        self.paused.set();
        Ok(())
    }

    /// Synchronous single-step advance without engaging the pause gate.
    pub fn run_one_step(&self) -> Result<(), SimError> {
        self.all_nodes
            .iter()
            .try_for_each(|node| node.execute().map(drop))
    }

    // ── Pause / resume ────────────────────────────────────────────────────

    /// Arm a one-shot pause at `step`; only the most recent call is honored.
    /// Returns the token the caller blocks on, or `None` when the step has
    /// already passed.
    pub fn pause_at_step(&self, step: u64) -> Option<Arc<Event>> {
        if step < self.current_step() {
            return None;
        }
        *self.stop_step.lock() = Some(step);
        Some(self.paused.clone())
    }

    /// Release both the simulator and the paused controller.
    pub fn resume(&self) {
        self.paused.clear();
        self.resume_gate.set();
    }

    // ── Inspection and cross-model calls ──────────────────────────────────

    pub fn call_model_api(
        &self,
        topology_id: u32,
        node_id: u32,
        model_name: &str,
        api: ModelApi,
    ) -> Result<ApiValue, SimError> {
        self.node(topology_id, node_id)?.call_model_by_name(model_name, api)
    }

    /// A *copy* of the node's current time or position.
    pub fn get_node_info(
        &self,
        topology_id: u32,
        node_id: u32,
        info_type: &str,
    ) -> Result<RuntimeValue, SimError> {
        let node = self.node(topology_id, node_id)?;
        match info_type {
            "time" => Ok(RuntimeValue::Time(node.timestamp())),
            "position" => Ok(RuntimeValue::Position(node.get_position(None)?)),
            other => Err(SimError::Api(format!(
                "node info type `{other}` is not supported"
            ))),
        }
    }

    // ── FOV precompute ────────────────────────────────────────────────────

    /// Fill the FOV index for every satellite/ground pair over the whole
    /// horizon, in parallel, then freeze it. Optionally persists the table.
    pub fn compute_fovs(
        &self,
        output_path: Option<&Path>,
        num_workers: Option<usize>,
    ) -> Result<(), SimError> {
        let topology = self.topologies.first().ok_or_else(|| {
            SimError::Api("compute_FOVs needs at least one topology".into())
        })?;
        let satellites = topology.nodes_of_kind(NodeKind::Sat);
        let workers = num_workers.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| SimError::Resource(format!("couldn't build FOV pool: {e}")))?;

        let targets = vec![NodeKind::GroundStation, NodeKind::IotDevice];
        pool.install(|| {
            satellites.par_iter().try_for_each(|sat| {
                sat.call_model_by_name(
                    "ModelFovTimeBased",
                    ModelApi::FindPasses { target_kinds: targets.clone() },
                )
                .map(drop)
            })
        })?;

        self.fov.set_preloaded();
        if let Some(path) = output_path {
            self.fov.save(path)?;
        }
        Ok(())
    }

    pub fn load_fovs(&self, input_path: &Path) -> Result<(), SimError> {
        self.fov.load(input_path)
    }

    // ── Name-addressed runtime API boundary ───────────────────────────────

    /// Dispatch a runtime API call by its external name. Unknown names are
    /// logged and answered with [`RuntimeValue::None`].
    pub fn call_api(&self, name: &str, args: &serde_json::Value) -> Result<RuntimeValue, SimError> {
        let u32_arg = |key: &str| -> Result<u32, SimError> {
            args.get(key)
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .ok_or_else(|| SimError::Api(format!("API {name} needs argument `{key}`")))
        };
        match name {
            "call_model_api_by_name" => {
                let api_name = args
                    .get("api_name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SimError::Api("call_model_api_by_name needs `api_name`".into()))?;
                let model_name = args
                    .get("model_name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SimError::Api("call_model_api_by_name needs `model_name`".into()))?;
                let api_args = args.get("api_args").cloned().unwrap_or(serde_json::Value::Null);
                let api = ModelApi::from_name(api_name, &api_args)?;
                let value = self.call_model_api(
                    u32_arg("topology_id")?,
                    u32_arg("node_id")?,
                    model_name,
                    api,
                )?;
                Ok(RuntimeValue::Api(value))
            }
            "get_node_info" => {
                let info_type = args
                    .get("info_type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SimError::Api("get_node_info needs `info_type`".into()))?;
                self.get_node_info(u32_arg("topology_id")?, u32_arg("node_id")?, info_type)
            }
            "pause_at_time" => {
                let step = args
                    .get("timestep")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| SimError::Api("pause_at_time needs `timestep`".into()))?;
                Ok(match self.pause_at_step(step) {
                    Some(token) => RuntimeValue::Token(token),
                    None => RuntimeValue::None,
                })
            }
            "resume" => {
                self.resume();
                Ok(RuntimeValue::None)
            }
            "get_topologies" => Ok(RuntimeValue::TopologyIds(
                self.topologies.iter().map(Topology::id).collect(),
            )),
            "compute_FOVs" => {
                let output = args
                    .get("output_path")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from);
                let workers = args
                    .get("num_workers")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize);
                self.compute_fovs(output.as_deref(), workers)?;
                Ok(RuntimeValue::None)
            }
            "load_FOVs" => {
                let input = args
                    .get("input_path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SimError::Api("load_FOVs needs `input_path`".into()))?;
                self.load_fovs(Path::new(input))?;
                Ok(RuntimeValue::None)
            }
            "run_one_step" => {
                self.run_one_step()?;
                Ok(RuntimeValue::None)
            }
            other => {
                warn!(api = other, "unknown runtime API name");
                Ok(RuntimeValue::None)
            }
        }
    }
}
