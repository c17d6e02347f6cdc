//! # satnet-sim
//!
//! A discrete-time satellite-network simulator: nodes (satellites, ground
//! stations, IoT end-devices) advance through a bounded interval in fixed
//! steps, each running an ordered list of capability models that together
//! reproduce orbital motion, visibility, energy budgets, radio physics with
//! interference, MAC protocols and data handling.
//!
//! The pipeline: [`sim::orchestrator::Orchestrator`] turns a JSON
//! configuration into topologies of [`node::Node`]s;
//! [`sim::manager::Manager`] drives the step loop, fans nodes out across a
//! worker pool, and serves the runtime API (pause/inspect/resume, FOV
//! precompute); [`sim::simulator::Simulator`] ties both together for the
//! CLI driver.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod models;
pub mod net;
pub mod node;
pub mod sim;
pub mod topology;

pub use error::SimError;
pub use sim::manager::{Manager, RuntimeValue};
pub use sim::simulator::Simulator;
