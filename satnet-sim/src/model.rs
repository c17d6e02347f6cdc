//! Model contract: the behavioral plug-in interface every capability module
//! implements, and the typed message surface models use to call each other.
//!
//! String-keyed dispatch exists only at the manager boundary (an external
//! contract); inside the simulator a call is a [`ModelApi`] variant handled
//! by the model's `dispatch`, returning a typed [`ApiValue`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use satnet_types::{DataUnit, Location, MacUnit, NodeKind, Time};

use crate::error::SimError;
use crate::net::device::RadioDevice;
use crate::node::Node;

// ── Capability tags ───────────────────────────────────────────────────────────

/// Coarse capability label of a model, used for typed cross-model lookup.
/// The set is closed; a node carries at most one *looked-up* model per tag
/// (first installed wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTag {
    Orbital,
    FieldOfView,
    Power,
    Radio,
    Mac,
    DataStore,
    DataGenerator,
    Scheduler,
    Imaging,
    Compute,
    Adacs,
    Isl,
}

// ── API messages ──────────────────────────────────────────────────────────────

/// How energy is requested from the power model.
#[derive(Debug, Clone)]
pub enum EnergyRequest {
    /// Joules, directly
    Joules(f64),
    /// Power draw over a duration
    Power { watts: f64, duration_s: f64 },
    /// Configured per-tag draw over a duration
    Tagged { tag: String, duration_s: f64 },
}

/// One row of an on-board transmit schedule (installed by an external
/// pre-pass scheduler through the runtime API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub start: Time,
    pub end: Time,
    pub target_node: u32,
}

/// A cross-model operation. Each model handles the subset it exposes and
/// rejects the rest with [`SimError::UnsupportedApi`].
#[derive(Debug, Clone)]
pub enum ModelApi {
    // orbital
    InSunlight,
    GetPosition { time: Time },
    GetVelocity { time: Time },
    GetPasses {
        ground: Arc<Node>,
        start: Time,
        end: Time,
        min_elevation_deg: f64,
    },

    // field of view
    GetView {
        target_kinds: Vec<NodeKind>,
        at: Option<Time>,
    },
    FindPasses { target_kinds: Vec<NodeKind> },

    // power
    ConsumeEnergy(EnergyRequest),
    HasEnergy { tag: String },
    GetAvailableEnergy,
    GetMinCharge,
    GetMaxCharge,

    // radio
    AddPacketToTransmit { packet: MacUnit },
    SendPacket {
        packet: Option<MacUnit>,
        destination: Option<u32>,
    },
    GetReceivedPacket,
    GetRxQueueSize,
    GetTxQueueSize,
    TurnRxOn,
    TurnRxOff,
    GetFrequency,
    SetFrequency { hz: f64 },
    GetPhyParam { name: String },
    SetPhyParam { name: String, value: f64 },
    GetRadioDevice,

    // data store / generator
    AddData { data: DataUnit },
    GetData,
    GetQueueSize,

    // scheduler
    SetSchedule { entries: Vec<ScheduleEntry> },
    GetTarget { at: Time },

    // imaging
    TakeImage,
}

impl ModelApi {
    /// snake_case operation name, the external contract at the manager
    /// boundary.
    pub fn name(&self) -> &'static str {
        match self {
            ModelApi::InSunlight => "in_sunlight",
            ModelApi::GetPosition { .. } => "get_position",
            ModelApi::GetVelocity { .. } => "get_velocity",
            ModelApi::GetPasses { .. } => "get_passes",
            ModelApi::GetView { .. } => "get_view",
            ModelApi::FindPasses { .. } => "find_passes",
            ModelApi::ConsumeEnergy(..) => "consume_energy",
            ModelApi::HasEnergy { .. } => "has_energy",
            ModelApi::GetAvailableEnergy => "get_available_energy",
            ModelApi::GetMinCharge => "get_min_charge",
            ModelApi::GetMaxCharge => "get_max_charge",
            ModelApi::AddPacketToTransmit { .. } => "add_packet_to_transmit",
            ModelApi::SendPacket { .. } => "send_packet",
            ModelApi::GetReceivedPacket => "get_received_packet",
            ModelApi::GetRxQueueSize => "get_rx_queue_size",
            ModelApi::GetTxQueueSize => "get_tx_queue_size",
            ModelApi::TurnRxOn => "turn_rx_on",
            ModelApi::TurnRxOff => "turn_rx_off",
            ModelApi::GetFrequency => "get_frequency",
            ModelApi::SetFrequency { .. } => "set_frequency",
            ModelApi::GetPhyParam { .. } => "get_phy_param",
            ModelApi::SetPhyParam { .. } => "set_phy_param",
            ModelApi::GetRadioDevice => "get_radio_device",
            ModelApi::AddData { .. } => "add_data",
            ModelApi::GetData => "get_data",
            ModelApi::GetQueueSize => "get_queue_size",
            ModelApi::SetSchedule { .. } => "set_schedule",
            ModelApi::GetTarget { .. } => "get_target",
            ModelApi::TakeImage => "take_image",
        }
    }

    /// Build a call from its external name and a flat JSON argument map.
    /// Only the operations meaningful to an out-of-process controller are
    /// representable here; packet- and handle-carrying calls are internal.
    pub fn from_name(name: &str, args: &serde_json::Value) -> Result<ModelApi, SimError> {
        let missing = |key: &str| SimError::Api(format!("API {name} needs argument `{key}`"));
        let f64_arg = |key: &str| -> Result<f64, SimError> {
            args.get(key).and_then(|v| v.as_f64()).ok_or_else(|| missing(key))
        };
        let str_arg = |key: &str| -> Result<String, SimError> {
            args.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| missing(key))
        };
        let kinds_arg = |key: &str| -> Result<Vec<NodeKind>, SimError> {
            let raw = args.get(key).cloned().ok_or_else(|| missing(key))?;
            serde_json::from_value(raw)
                .map_err(|e| SimError::Api(format!("API {name}: bad `{key}`: {e}")))
        };
        match name {
            "in_sunlight" => Ok(ModelApi::InSunlight),
            "get_view" => Ok(ModelApi::GetView {
                target_kinds: kinds_arg("target_kinds")?,
                at: None,
            }),
            "find_passes" => Ok(ModelApi::FindPasses {
                target_kinds: kinds_arg("target_kinds")?,
            }),
            "has_energy" => Ok(ModelApi::HasEnergy { tag: str_arg("tag")? }),
            "get_available_energy" => Ok(ModelApi::GetAvailableEnergy),
            "get_min_charge" => Ok(ModelApi::GetMinCharge),
            "get_max_charge" => Ok(ModelApi::GetMaxCharge),
            "get_rx_queue_size" => Ok(ModelApi::GetRxQueueSize),
            "get_tx_queue_size" => Ok(ModelApi::GetTxQueueSize),
            "get_queue_size" => Ok(ModelApi::GetQueueSize),
            "turn_rx_on" => Ok(ModelApi::TurnRxOn),
            "turn_rx_off" => Ok(ModelApi::TurnRxOff),
            "get_frequency" => Ok(ModelApi::GetFrequency),
            "set_frequency" => Ok(ModelApi::SetFrequency { hz: f64_arg("frequency")? }),
            "set_schedule" => {
                let raw = args
                    .get("entries")
                    .cloned()
                    .ok_or_else(|| missing("entries"))?;
                let entries: Vec<ScheduleEntry> = serde_json::from_value(raw)
                    .map_err(|e| SimError::Api(format!("API set_schedule: bad entries: {e}")))?;
                Ok(ModelApi::SetSchedule { entries })
            }
            "get_target" => {
                let at = Time::from_str(&str_arg("at")?)
                    .map_err(|e| SimError::Api(format!("API get_target: bad `at`: {e}")))?;
                Ok(ModelApi::GetTarget { at })
            }
            "take_image" => Ok(ModelApi::TakeImage),
            other => Err(SimError::Api(format!("unknown model API `{other}`"))),
        }
    }
}

// ── API results ───────────────────────────────────────────────────────────────

/// Typed result of a [`ModelApi`] call.
#[derive(Debug, Clone)]
pub enum ApiValue {
    None,
    Bool(bool),
    F64(f64),
    Size(usize),
    Time(Time),
    Position(Location),
    Velocity([f64; 3]),
    NodeIds(Vec<u32>),
    Passes(Vec<(Time, Time)>),
    Packet(Option<MacUnit>),
    Data(Option<DataUnit>),
    Target(Option<u32>),
    Device(Arc<RadioDevice>),
}

impl ApiValue {
    pub fn as_bool(&self) -> Result<bool, SimError> {
        match self {
            ApiValue::Bool(b) => Ok(*b),
            other => Err(SimError::Api(format!("expected bool, got {other:?}"))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, SimError> {
        match self {
            ApiValue::F64(v) => Ok(*v),
            other => Err(SimError::Api(format!("expected f64, got {other:?}"))),
        }
    }

    pub fn as_size(&self) -> Result<usize, SimError> {
        match self {
            ApiValue::Size(v) => Ok(*v),
            other => Err(SimError::Api(format!("expected size, got {other:?}"))),
        }
    }

    pub fn into_packet(self) -> Result<Option<MacUnit>, SimError> {
        match self {
            ApiValue::Packet(p) => Ok(p),
            other => Err(SimError::Api(format!("expected packet, got {other:?}"))),
        }
    }

    pub fn into_data(self) -> Result<Option<DataUnit>, SimError> {
        match self {
            ApiValue::Data(d) => Ok(d),
            other => Err(SimError::Api(format!("expected data, got {other:?}"))),
        }
    }

    pub fn into_node_ids(self) -> Result<Vec<u32>, SimError> {
        match self {
            ApiValue::NodeIds(ids) => Ok(ids),
            other => Err(SimError::Api(format!("expected node ids, got {other:?}"))),
        }
    }

    pub fn into_passes(self) -> Result<Vec<(Time, Time)>, SimError> {
        match self {
            ApiValue::Passes(p) => Ok(p),
            other => Err(SimError::Api(format!("expected passes, got {other:?}"))),
        }
    }

    pub fn into_device(self) -> Result<Arc<RadioDevice>, SimError> {
        match self {
            ApiValue::Device(d) => Ok(d),
            other => Err(SimError::Api(format!("expected radio device, got {other:?}"))),
        }
    }
}

// ── The contract ──────────────────────────────────────────────────────────────

/// A behavioral plug-in attached to a node.
pub trait Model: Send {
    /// Class name as used in the configuration (`iname`), e.g. `ModelPower`.
    fn name(&self) -> &'static str;

    fn tag(&self) -> ModelTag;

    /// Node classes this model accepts; empty means any.
    fn supported_node_classes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Conjunction of disjunctions over model inames: every outer slot must
    /// be satisfied by some other model on the same node.
    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[]
    }

    /// Handle one cross-model operation.
    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError>;

    /// Run once per simulated step, in the node's configured model order.
    fn execute(&mut self) -> Result<(), SimError>;
}
