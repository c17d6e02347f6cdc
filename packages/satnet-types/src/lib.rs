//! # satnet-types
//!
//! Shared value types for the satnet discrete-time satellite-network
//! simulator.
//!
//! These types are used by:
//! - `satnet-sim`: the simulation runtime, radio layer and models
//! - external controllers driving the runtime API (pause/inspect tooling)
//!
//! ## Conventions
//!
//! - **Time**: UTC wall-clock instants with microsecond resolution
//! - **Location**: Earth-centered Earth-fixed (ECEF) Cartesian, meters
//! - **Frame payloads**: opaque bytes (bincode-encoded MAC units)

pub mod location;
pub mod time;
pub mod units;

pub use location::Location;
pub use time::Time;
pub use units::{
    next_data_id, next_frame_id, next_mac_id, reset_id_counters, DataKind, DataUnit, Frame,
    MacHeader, MacUnit, BROADCAST_RADIO,
};

use serde::{Deserialize, Serialize};

// ── Node kind ─────────────────────────────────────────────────────────────────

/// Coarse class of a simulated entity, as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Orbiting satellite (position propagated from a TLE)
    #[serde(rename = "SAT")]
    Sat,
    /// Fixed ground station
    #[serde(rename = "GS")]
    GroundStation,
    /// Fixed IoT end-device
    #[serde(rename = "IoT")]
    IotDevice,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Sat => "SAT",
            NodeKind::GroundStation => "GS",
            NodeKind::IotDevice => "IoT",
        };
        write!(f, "{s}")
    }
}
