//! Declarative configuration: the JSON document the orchestrator turns into
//! a running simulation environment.

use std::path::Path;

use serde::Deserialize;

use satnet_types::NodeKind;

use crate::error::SimError;

#[derive(Debug, Deserialize)]
pub struct ConfigData {
    pub topologies: Vec<TopologyConfig>,
    pub simtime: SimTimeConfig,
    pub simlogsetup: LogSetupConfig,
}

#[derive(Debug, Deserialize)]
pub struct TopologyConfig {
    pub name: String,
    pub id: u32,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub iname: String,
    pub nodeid: u32,
    pub loglevel: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub tle_1: Option<String>,
    pub tle_2: Option<String>,
    #[serde(default)]
    pub additionalargs: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub iname: String,
    /// Model-specific keys, handed to the model initializer as-is
    #[serde(flatten)]
    pub args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SimTimeConfig {
    pub starttime: String,
    pub endtime: String,
    /// Step length Δ in seconds
    pub delta: f64,
}

#[derive(Debug, Deserialize)]
pub struct LogSetupConfig {
    pub loghandler: String,
    #[serde(default)]
    pub logfolder: String,
    #[serde(default)]
    pub logchunksize: Option<usize>,
}

impl ConfigData {
    pub fn from_path(path: &Path) -> Result<ConfigData, SimError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("couldn't read config file {path:?}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| SimError::Config(format!("couldn't parse config file {path:?}: {e}")))
    }
}
