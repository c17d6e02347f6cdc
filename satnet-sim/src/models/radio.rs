//! Radio models: the queue-and-schedule layer over a radio device.
//!
//! Four configurable variants share one implementation. `ModelLoraRadio` is
//! the single radio of ground stations and end-devices; satellites carry a
//! `ModelDownlinkRadio` (ground-station side) and a `ModelAggregatorRadio`
//! (end-device uplink side) so the two MAC planes stay separable by name.
//! `ModelImagingRadio` swaps in the directional physics and point-to-point
//! channels, and consults the on-board scheduler for its transmit target.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::{MacUnit, NodeKind};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, EnergyRequest, Model, ModelApi, ModelTag};
use crate::net::channel::Channel;
use crate::net::device::RadioDevice;
use crate::net::link::{PhySetup, RadioFamily};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioModelKind {
    Lora,
    Downlink,
    Aggregator,
    Imaging,
}

impl RadioModelKind {
    fn name(&self) -> &'static str {
        match self {
            RadioModelKind::Lora => "ModelLoraRadio",
            RadioModelKind::Downlink => "ModelDownlinkRadio",
            RadioModelKind::Aggregator => "ModelAggregatorRadio",
            RadioModelKind::Imaging => "ModelImagingRadio",
        }
    }

    fn family(&self) -> RadioFamily {
        match self {
            RadioModelKind::Imaging => RadioFamily::Imaging,
            _ => RadioFamily::Lora,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RadioArgs {
    radio_physetup: PhySetup,
    #[serde(default)]
    radio_id: Option<u32>,
    /// Negative means unbounded, matching the config convention
    #[serde(default)]
    queue_size: Option<i64>,
    #[serde(default = "default_self_ctrl")]
    self_ctrl: bool,
}

fn default_self_ctrl() -> bool {
    true
}

pub struct ModelGenericRadio {
    kind: RadioModelKind,
    owner: Weak<Node>,
    logger: Arc<Logger>,
    radio_id: u32,
    device: Arc<RadioDevice>,
    rx_queue: VecDeque<MacUnit>,
    tx_queue: VecDeque<MacUnit>,
    max_queue: Option<usize>,
    self_ctrl: bool,
    rx_on: bool,
}

impl ModelGenericRadio {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("radio model lost its owner node".into()))
    }

    pub fn radio_id(&self) -> u32 {
        self.radio_id
    }

    fn log_action(&self, action: &str, object: Option<&MacUnit>) -> Result<(), SimError> {
        let owner = self.owner()?;
        let (object_type, object_id) = match object {
            Some(unit) => (unit.kind_name(), format!("{}", unit.header().id)),
            None => ("None", "None".to_string()),
        };
        let mut nodes: Vec<u32> = self
            .device
            .channels()
            .iter()
            .flat_map(Channel::owner_node_ids)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        self.logger.log(
            LogLevel::Info,
            Some(&owner.timestamp()),
            Some(self.kind.name()),
            &format!(
                "Action: {action}. ObjectType: {object_type}. ObjectID: {object_id}. \
                 NodesInChannels: {nodes:?}. RxQueueSize: {}. TxQueueSize: {}",
                self.rx_queue.len(),
                self.tx_queue.len()
            ),
        )?;
        Ok(())
    }

    /// Rebuild the device's channels from the current visibility set.
    fn update_channels(&self) -> Result<(), SimError> {
        let owner = self.owner()?;
        let target_kinds: Vec<NodeKind> = if owner.kind() != NodeKind::Sat {
            vec![NodeKind::Sat]
        } else {
            vec![NodeKind::GroundStation, NodeKind::IotDevice]
        };
        let mut visible = owner
            .call_model_by_tag(
                ModelTag::FieldOfView,
                ModelApi::GetView { target_kinds, at: None },
            )?
            .into_node_ids()?;
        self.logger.log(
            LogLevel::Info,
            Some(&owner.timestamp()),
            Some(self.kind.name()),
            &format!("Node {} has {} nodes in its view", owner.node_id(), visible.len()),
        )?;

        // The imaging radio is directional: when a transmit schedule is
        // installed, only the scheduled target is reachable.
        if self.kind == RadioModelKind::Imaging {
            if let Some(value) = owner.try_call_model_by_tag(
                ModelTag::Scheduler,
                ModelApi::GetTarget { at: owner.timestamp() },
            )? {
                if let ApiValue::Target(Some(target)) = value {
                    visible.retain(|id| *id == target);
                }
            }
        }

        if visible.is_empty() {
            self.device.set_channels(Vec::new());
            return Ok(());
        }

        let manager = owner.manager()?;
        let topology = manager
            .topology(owner.topology_id())
            .ok_or_else(|| SimError::Dependency("owning topology not found".into()))?;
        let frequency = self.device.frequency_hz();

        let mut peer_devices: Vec<Arc<RadioDevice>> = Vec::new();
        for node_id in visible {
            let Some(peer) = topology.node(node_id) else { continue };
            for port in peer.radio_ports() {
                if port.family == self.kind.family()
                    && port.device.address() != self.device.address()
                    && port.device.frequency_hz() == frequency
                {
                    peer_devices.push(port.device.clone());
                }
            }
        }

        match self.kind.family() {
            RadioFamily::Lora => {
                self.logger.log(
                    LogLevel::Info,
                    Some(&owner.timestamp()),
                    Some(self.kind.name()),
                    &format!(
                        "Node {} has {} devices on the same frequency",
                        owner.node_id(),
                        peer_devices.len()
                    ),
                )?;
                if peer_devices.is_empty() {
                    self.device.set_channels(Vec::new());
                    return Ok(());
                }
                let mut channel = Channel::new();
                for device in peer_devices {
                    channel.add_device(device);
                }
                channel.add_device(self.device.clone());
                self.device.set_channels(vec![channel]);
            }
            RadioFamily::Imaging => {
                let channels: Vec<Channel> = peer_devices
                    .into_iter()
                    .map(|device| {
                        let mut channel = Channel::new();
                        channel.add_device(device);
                        channel.add_device(self.device.clone());
                        channel
                    })
                    .collect();
                self.device.set_channels(channels);
            }
        }
        Ok(())
    }

    fn send_packet(
        &mut self,
        packet: Option<MacUnit>,
        destination: Option<u32>,
    ) -> Result<bool, SimError> {
        let owner = self.owner()?;
        // Out of transmit energy: the packet stays where it is
        if let Some(value) =
            owner.try_call_model_by_tag(ModelTag::Power, ModelApi::HasEnergy { tag: "TXRADIO".into() })?
        {
            if !value.as_bool()? {
                self.log_action("noPower", packet.as_ref())?;
                return Ok(false);
            }
        }

        let packet = match packet {
            Some(p) => p,
            None => match self.tx_queue.pop_front() {
                Some(p) => p,
                None => return Ok(false),
            },
        };

        self.update_channels()?;
        let channels = self.device.channels();
        if channels.is_empty() {
            self.log_action("noChannel", Some(&packet))?;
            return Ok(false);
        }

        let mut channel_index = 0;
        if let Some(dest) = destination {
            match channels
                .iter()
                .position(|c| c.owner_node_ids().contains(&dest))
            {
                Some(idx) => channel_index = idx,
                None => {
                    self.log_action("noChannel", Some(&packet))?;
                    return Ok(false);
                }
            }
        }

        let bytes = bincode::serialize(&packet)?;
        let sent = self
            .device
            .send(packet.header().size, &bytes, channel_index)?;
        if sent {
            self.log_action("sent", Some(&packet))?;
        } else {
            // Radio busy or physics drop; the device log has the reason
            self.log_action("attemptedToSend", Some(&packet))?;
        }
        Ok(sent)
    }
}

impl Model for ModelGenericRadio {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Radio
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[&["ModelFovTimeBased"]]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::AddPacketToTransmit { packet } => {
                if self.max_queue.is_some_and(|max| self.tx_queue.len() >= max) {
                    return Ok(ApiValue::Bool(false));
                }
                self.log_action("addedToTxQueue", Some(&packet))?;
                self.tx_queue.push_back(packet);
                Ok(ApiValue::Bool(true))
            }
            ModelApi::SendPacket { packet, destination } => {
                Ok(ApiValue::Bool(self.send_packet(packet, destination)?))
            }
            ModelApi::GetReceivedPacket => {
                let packet = self.rx_queue.pop_front();
                if let Some(p) = &packet {
                    self.log_action("dequeued", Some(p))?;
                }
                Ok(ApiValue::Packet(packet))
            }
            ModelApi::GetRxQueueSize => Ok(ApiValue::Size(self.rx_queue.len())),
            ModelApi::GetTxQueueSize => Ok(ApiValue::Size(self.tx_queue.len())),
            ModelApi::TurnRxOn => {
                self.rx_on = true;
                Ok(ApiValue::None)
            }
            ModelApi::TurnRxOff => {
                self.rx_on = false;
                Ok(ApiValue::None)
            }
            ModelApi::GetFrequency => Ok(ApiValue::F64(self.device.frequency_hz())),
            ModelApi::SetFrequency { hz } => {
                self.device.set_phy_param("_frequency", hz)?;
                Ok(ApiValue::None)
            }
            ModelApi::GetPhyParam { name } => Ok(ApiValue::F64(self.device.phy_param(&name)?)),
            ModelApi::SetPhyParam { name, value } => {
                self.device.set_phy_param(&name, value)?;
                Ok(ApiValue::None)
            }
            ModelApi::GetRadioDevice => Ok(ApiValue::Device(self.device.clone())),
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();

        // Resolve receptions that completed by this step
        for payload in self.device.update(now)? {
            let packet: MacUnit = bincode::deserialize(&payload)?;
            if self.max_queue.is_some_and(|max| self.rx_queue.len() >= max) {
                continue;
            }
            self.log_action("received", Some(&packet))?;
            self.rx_queue.push_back(packet);
        }

        // Receiver energy accounting
        let has_power_model = owner.has_model_with_tag(ModelTag::Power);
        if has_power_model {
            let granted = owner
                .call_model_by_tag(ModelTag::Power, ModelApi::HasEnergy { tag: "RXRADIO".into() })?
                .as_bool()?;
            if !granted {
                self.rx_on = false;
            }
            if self.rx_on {
                owner.call_model_by_tag(
                    ModelTag::Power,
                    ModelApi::ConsumeEnergy(EnergyRequest::Tagged {
                        tag: "RXRADIO".into(),
                        duration_s: owner.delta_s(),
                    }),
                )?;
            }
        }

        if self.tx_queue.is_empty() || self.device.is_tx_busy(now) {
            return Ok(());
        }
        if self.self_ctrl {
            self.send_packet(None, None)?;
        }
        Ok(())
    }
}

pub fn init(
    kind: RadioModelKind,
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: RadioArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "{} on node {} needs radio_physetup: {e}",
            kind.name(),
            node.node_id()
        ))
    })?;
    if kind.family() == RadioFamily::Lora && !(7..=12).contains(&args.radio_physetup.sf) {
        return Err(SimError::Config(format!(
            "{} on node {}: spreading factor {} outside 7..=12",
            kind.name(),
            node.node_id(),
            args.radio_physetup.sf
        )));
    }
    let radio_id = args.radio_id.unwrap_or_else(|| node.node_id());
    let device = RadioDevice::new(
        radio_id,
        kind.family(),
        Arc::downgrade(node),
        logger.clone(),
        args.radio_physetup,
    );
    let max_queue = match args.queue_size {
        Some(size) if size >= 0 => Some(size as usize),
        _ => None,
    };
    Ok(Box::new(ModelGenericRadio {
        kind,
        owner: Arc::downgrade(node),
        logger,
        radio_id,
        device,
        rx_queue: VecDeque::new(),
        tx_queue: VecDeque::new(),
        max_queue,
        self_ctrl: args.self_ctrl,
        rx_on: true,
    }))
}
