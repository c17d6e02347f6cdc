//! Simulator error taxonomy.
//!
//! Radio-physics drops (MTU, busy radio, no channel, SNR floor) are *not*
//! errors; they surface as `false` send results plus a logged drop reason.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Bad or incomplete configuration; fatal before the run starts.
    #[error("config error: {0}")]
    Config(String),

    /// Runtime API misuse (unknown name, missing argument, stale step).
    #[error("API misuse: {0}")]
    Api(String),

    /// A model was asked for an operation it does not expose.
    #[error("model {model} does not handle API {api}")]
    UnsupportedApi { model: &'static str, api: &'static str },

    /// A model needed another model that the node does not carry.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Orbital propagation failure (bad TLE, propagation out of range).
    #[error("orbital error: {0}")]
    Orbit(String),

    /// Log directory or file could not be created or written.
    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Serde(e.to_string())
    }
}

impl From<bincode::Error> for SimError {
    fn from(e: bincode::Error) -> Self {
        SimError::Serde(e.to_string())
    }
}
