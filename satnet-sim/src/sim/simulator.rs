//! The face of the pipeline: orchestrate once, then hand the environment to
//! the manager and expose its runtime API.

use std::path::Path;
use std::sync::Arc;

use crate::error::SimError;
use crate::sim::manager::{Manager, RuntimeValue};
use crate::sim::orchestrator::Orchestrator;

pub struct Simulator {
    manager: Arc<Manager>,
}

impl Simulator {
    /// Build the simulation environment from a configuration file.
    /// `num_workers == 1` keeps per-step execution serial.
    pub fn new(config_path: &Path, num_workers: usize) -> Result<Simulator, SimError> {
        let env = Orchestrator::from_path(config_path)?.create_sim_env()?;
        let manager = Manager::new(env.topologies, env.num_steps, num_workers, env.fov)?;
        Ok(Simulator { manager })
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Run the simulation to completion.
    pub fn execute(&self) -> Result<(), SimError> {
        self.manager.run_sim()
    }

    /// Name-addressed runtime API, the external controller contract.
    pub fn call_runtime_api(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<RuntimeValue, SimError> {
        self.manager.call_api(name, args)
    }
}
