//! The orchestrator: reads the declarative configuration and prepares nodes
//! with properly validated models, loggers and a shared FOV index.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use satnet_types::{Location, NodeKind, Time};

use crate::config::{ConfigData, ModelConfig, NodeConfig, TopologyConfig};
use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::Model;
use crate::models;
use crate::models::fov::FovIndex;
use crate::models::radio::RadioModelKind;
use crate::node::Node;
use crate::topology::Topology;

/// Everything the manager needs to run.
pub struct SimEnv {
    pub topologies: Vec<Topology>,
    pub num_steps: u64,
    pub delta_s: f64,
    pub fov: Arc<FovIndex>,
}

pub struct Orchestrator {
    config: ConfigData,
    /// Model-name sets whose dependencies already resolved; identical nodes
    /// skip re-validation.
    resolved_sets: Vec<BTreeSet<String>>,
}

impl Orchestrator {
    pub fn from_path(config_path: &Path) -> Result<Orchestrator, SimError> {
        Ok(Orchestrator {
            config: ConfigData::from_path(config_path)?,
            resolved_sets: Vec::new(),
        })
    }

    pub fn create_sim_env(mut self) -> Result<SimEnv, SimError> {
        let start = Time::from_str(&self.config.simtime.starttime)
            .map_err(|e| SimError::Config(format!("bad starttime: {e}")))?;
        let end = Time::from_str(&self.config.simtime.endtime)
            .map_err(|e| SimError::Config(format!("bad endtime: {e}")))?;
        let delta = self.config.simtime.delta;
        if delta <= 0.0 {
            return Err(SimError::Config(format!("delta must be positive, got {delta}")));
        }
        if end <= start {
            return Err(SimError::Config(format!(
                "endtime {end} must come after starttime {start}"
            )));
        }
        let num_steps = (end.diff_seconds(&start) / delta) as u64;
        if num_steps == 0 {
            return Err(SimError::Config(
                "simulation interval shorter than one step".into(),
            ));
        }

        let fov = FovIndex::new();
        let mut topologies = Vec::new();
        let topology_configs = std::mem::take(&mut self.config.topologies);
        for topology_config in &topology_configs {
            if topology_config.name.is_empty() {
                return Err(SimError::Config("topology name must not be empty".into()));
            }
            let mut topology = Topology::new(&topology_config.name, topology_config.id);
            for node_config in &topology_config.nodes {
                let node = self
                    .build_node(topology_config, node_config, start, end, delta, &fov)
                    .map_err(|e| {
                        SimError::Config(format!(
                            "error initializing node {} of topology {}: {e}",
                            node_config.nodeid, topology_config.id
                        ))
                    })?;
                topology.add_node(node)?;
            }
            topologies.push(topology);
        }

        Ok(SimEnv {
            topologies,
            num_steps,
            delta_s: delta,
            fov,
        })
    }

    fn build_logger(
        &self,
        topology_config: &TopologyConfig,
        node_config: &NodeConfig,
    ) -> Result<Arc<Logger>, SimError> {
        let level = LogLevel::from_config(&node_config.loglevel)?;
        let name = format!(
            "{}_{}_{}_{}",
            topology_config.name, topology_config.id, node_config.kind, node_config.nodeid
        );
        let setup = &self.config.simlogsetup;
        let logger = match setup.loghandler.as_str() {
            "LoggerCmd" => Logger::cmd(level, &name),
            "LoggerFile" => Logger::file(level, &name, &PathBuf::from(&setup.logfolder))?,
            "LoggerFileChunkwise" => {
                let chunk = setup.logchunksize.ok_or_else(|| {
                    SimError::Config("LoggerFileChunkwise needs logchunksize".into())
                })?;
                Logger::chunked(level, &name, &PathBuf::from(&setup.logfolder), chunk)?
            }
            other => {
                return Err(SimError::Config(format!("unknown log handler `{other}`")));
            }
        };
        Ok(Arc::new(logger))
    }

    fn build_node(
        &mut self,
        topology_config: &TopologyConfig,
        node_config: &NodeConfig,
        start: Time,
        end: Time,
        delta: f64,
        fov: &Arc<FovIndex>,
    ) -> Result<Arc<Node>, SimError> {
        let logger = self.build_logger(topology_config, node_config)?;
        let node = match node_config.iname.as_str() {
            "SatelliteBasic" => {
                if node_config.kind != NodeKind::Sat {
                    return Err(SimError::Config(format!(
                        "SatelliteBasic node declared with type {}",
                        node_config.kind
                    )));
                }
                let tle_1 = node_config
                    .tle_1
                    .clone()
                    .ok_or_else(|| SimError::Config("SatelliteBasic needs tle_1".into()))?;
                let tle_2 = node_config
                    .tle_2
                    .clone()
                    .ok_or_else(|| SimError::Config("SatelliteBasic needs tle_2".into()))?;
                Node::new_satellite(
                    node_config.nodeid,
                    topology_config.id,
                    tle_1,
                    tle_2,
                    delta,
                    start,
                    end,
                    logger.clone(),
                )
            }
            iname @ ("GSBasic" | "IoTBasic") => {
                let expected_kind = if iname == "GSBasic" {
                    NodeKind::GroundStation
                } else {
                    NodeKind::IotDevice
                };
                if node_config.kind != expected_kind {
                    return Err(SimError::Config(format!(
                        "{iname} node declared with type {}",
                        node_config.kind
                    )));
                }
                let lat = node_config
                    .latitude
                    .ok_or_else(|| SimError::Config(format!("{iname} needs latitude")))?;
                let lon = node_config
                    .longitude
                    .ok_or_else(|| SimError::Config(format!("{iname} needs longitude")))?;
                let elev = node_config.elevation.unwrap_or(0.0);
                let iname_static: &'static str =
                    if iname == "GSBasic" { "GSBasic" } else { "IoTBasic" };
                Node::new_ground(
                    iname_static,
                    expected_kind,
                    node_config.nodeid,
                    topology_config.id,
                    Location::from_lat_lon(lat, lon, elev),
                    delta,
                    start,
                    end,
                    logger.clone(),
                )
            }
            other => {
                return Err(SimError::Config(format!("unknown node iname `{other}`")));
            }
        };

        self.add_models(&node, &logger, fov, &node_config.models)?;
        Ok(node)
    }

    /// Build, de-duplicate, compatibility-check and dependency-resolve the
    /// node's models, then freeze them onto the node.
    fn add_models(
        &mut self,
        node: &Arc<Node>,
        logger: &Arc<Logger>,
        fov: &Arc<FovIndex>,
        model_configs: &[ModelConfig],
    ) -> Result<(), SimError> {
        let mut built: Vec<Box<dyn Model>> = Vec::new();
        let mut names: BTreeSet<String> = BTreeSet::new();

        for model_config in model_configs {
            let model = build_model(&model_config.iname, node, logger, fov, &model_config.args)?;

            let supported = model.supported_node_classes();
            if !supported.is_empty() && !supported.contains(&node.iname()) {
                return Err(SimError::Config(format!(
                    "model {} does not support node class {}",
                    model.name(),
                    node.iname()
                )));
            }
            if names.contains(model.name()) {
                warn!(
                    model = model.name(),
                    node = node.node_id(),
                    "model added to node multiple times; skipping duplicate"
                );
                continue;
            }
            names.insert(model.name().to_string());
            built.push(model);
        }

        if !self.resolved_sets.contains(&names) {
            for model in &built {
                for slot in model.dependencies() {
                    let satisfied = slot
                        .iter()
                        .any(|dep| built.iter().any(|m| m.name() == *dep));
                    if !satisfied {
                        return Err(SimError::Config(format!(
                            "model {} has dependency mismatch inside node ID: {}; \
                             unmet slot: {slot:?}, models present: {names:?}",
                            model.name(),
                            node.node_id()
                        )));
                    }
                }
            }
            if names.len() > 1 {
                self.resolved_sets.push(names);
            }
        }

        if !built.is_empty() {
            node.install_models(built)?;
        }
        Ok(())
    }
}

/// The model registry: configuration `iname` → initializer.
fn build_model(
    iname: &str,
    node: &Arc<Node>,
    logger: &Arc<Logger>,
    fov: &Arc<FovIndex>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let logger = logger.clone();
    match iname {
        "ModelOrbit" => models::orbit::init(node, logger, args),
        "ModelFixedOrbit" => models::fixed_orbit::init(node, logger, args),
        "ModelFovTimeBased" => models::fov::init(node, logger, fov.clone(), args),
        "ModelPower" => models::power::init(node, logger, args),
        "ModelLoraRadio" => models::radio::init(RadioModelKind::Lora, node, logger, args),
        "ModelDownlinkRadio" => models::radio::init(RadioModelKind::Downlink, node, logger, args),
        "ModelAggregatorRadio" => {
            models::radio::init(RadioModelKind::Aggregator, node, logger, args)
        }
        "ModelImagingRadio" => models::radio::init(RadioModelKind::Imaging, node, logger, args),
        "ModelDataGenerator" => models::datagen::init(node, logger, args),
        "ModelDataStore" => models::datastore::init(node, logger, args),
        "ModelDataRelay" => models::datarelay::init(node, logger, args),
        "ModelMACiot" => models::mac_iot::init(node, logger, args),
        "ModelMACgateway" => models::mac_gateway::init(node, logger, args),
        "ModelMACgs" => models::mac_gs::init(node, logger, args),
        "ModelMACTTnC" => models::mac_ttnc::init(node, logger, args),
        "ModelImager" => models::imager::init(node, logger, args),
        "ModelScheduler" => models::scheduler::init(node, logger, args),
        other => Err(SimError::Config(format!("unknown model iname `{other}`"))),
    }
}
