//! Ground-station MAC: listen for beacons, request a batch of packets,
//! accumulate what arrives and close the round with a bulk ack.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::{DataUnit, MacHeader, MacUnit, Time};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GsState {
    /// On the beacon frequency, waiting for any satellite
    ListenBeacon,
    /// Beacon heard; issue the download request next step
    Request,
    /// Receiving data until a terminal control or inactivity timeout
    Receive,
}

#[derive(Debug, Deserialize)]
struct MacGsArgs {
    num_packets: u32,
    timeout: f64,
    beacon_frequency: f64,
    downlink_frequency: f64,
}

pub struct ModelMacGs {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    num_packets: u32,
    timeout_s: f64,
    beacon_hz: f64,
    downlink_hz: f64,
    state: GsState,
    received_ids: HashSet<u64>,
    listening_radio: i64,
    last_rx_time: Option<Time>,
    sequence: u32,
}

impl ModelMacGs {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("GS MAC lost its owner node".into()))
    }

    fn log(&self, owner: &Node, msg: &str) -> Result<(), SimError> {
        self.logger
            .log(LogLevel::Info, Some(&owner.timestamp()), Some(self.name()), msg)?;
        Ok(())
    }

    fn drain_rx(&self, owner: &Node) -> Result<Vec<MacUnit>, SimError> {
        let mut received = Vec::new();
        while let Some(unit) = owner
            .call_model_by_tag(ModelTag::Radio, ModelApi::GetReceivedPacket)?
            .into_packet()?
        {
            received.push(unit);
        }
        Ok(received)
    }

    fn radio_id(&self, owner: &Node) -> Result<u32, SimError> {
        Ok(owner
            .call_model_by_tag(ModelTag::Radio, ModelApi::GetRadioDevice)?
            .into_device()?
            .address())
    }

    fn set_frequency(&self, owner: &Node, hz: f64) -> Result<(), SimError> {
        owner.call_model_by_tag(ModelTag::Radio, ModelApi::SetFrequency { hz })?;
        Ok(())
    }
}

impl Model for ModelMacGs {
    fn name(&self) -> &'static str {
        "ModelMACgs"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["GSBasic"]
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[
            &["ModelLoraRadio", "ModelDownlinkRadio", "ModelAggregatorRadio"],
            &["ModelDataStore"],
        ]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        Err(SimError::UnsupportedApi {
            model: self.name(),
            api: api.name(),
        })
    }

    fn execute(&mut self) -> Result<(), SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();
        let received = self.drain_rx(&owner)?;

        match self.state {
            GsState::ListenBeacon => {
                self.set_frequency(&owner, self.beacon_hz)?;
                let beacon_source = received.iter().find_map(|u| match u {
                    MacUnit::Beacon { header, .. } => Some(header.source_radio),
                    _ => None,
                });
                if let Some(source) = beacon_source {
                    self.listening_radio = source as i64;
                    self.log(&owner, &format!("Received beacon from radio {source}"))?;
                    self.state = GsState::Request;
                }
            }
            GsState::Request => {
                self.set_frequency(&owner, self.downlink_hz)?;
                let control = MacUnit::Control {
                    header: MacHeader::new(
                        now,
                        self.radio_id(&owner)?,
                        self.listening_radio,
                        self.sequence,
                        8,
                    ),
                    num_packets: self.num_packets,
                };
                self.sequence += 1;
                self.log(
                    &owner,
                    &format!("Sending control packet asking for {}", self.num_packets),
                )?;
                owner.call_model_by_tag(
                    ModelTag::Radio,
                    ModelApi::SendPacket { packet: Some(control), destination: None },
                )?;
                self.received_ids.clear();
                self.last_rx_time = Some(now);
                self.state = GsState::Receive;
            }
            GsState::Receive => {
                if !received.is_empty() {
                    for unit in &received {
                        let MacUnit::Data { header, payload } = unit else { continue };
                        let data: DataUnit = bincode::deserialize(payload)?;
                        self.log(
                            &owner,
                            &format!(
                                "Received MACData packet {} with data id: {}",
                                header.id, data.id
                            ),
                        )?;
                        owner.call_model_by_tag(ModelTag::DataStore, ModelApi::AddData { data })?;
                        self.received_ids.insert(header.id);
                        self.last_rx_time = Some(now);
                    }
                }

                let terminal_control = received.iter().any(|u| {
                    matches!(u, MacUnit::Control { header, .. }
                        if header.source_radio as i64 == self.listening_radio)
                });
                let timed_out = self
                    .last_rx_time
                    .map(|t| now.diff_seconds(&t) > self.timeout_s)
                    .unwrap_or(false);
                if terminal_control || timed_out {
                    if terminal_control {
                        self.log(
                            &owner,
                            &format!("Received control packet from {}", self.listening_radio),
                        )?;
                    } else {
                        // The satellite likely left the horizon
                        self.log(
                            &owner,
                            &format!(
                                "Timed out waiting for packets from radio {}",
                                self.listening_radio
                            ),
                        )?;
                    }
                    let mut ids: Vec<u64> = self.received_ids.iter().copied().collect();
                    ids.sort_unstable();
                    self.log(&owner, &format!("Sending bulk ack for packets: {ids:?}"))?;
                    let ack = MacUnit::BulkAck {
                        header: MacHeader::new(
                            now,
                            self.radio_id(&owner)?,
                            self.listening_radio,
                            self.sequence,
                            8,
                        ),
                        received_mac_ids: ids,
                    };
                    self.sequence += 1;
                    owner.call_model_by_tag(
                        ModelTag::Radio,
                        ModelApi::SendPacket { packet: Some(ack), destination: None },
                    )?;
                    self.set_frequency(&owner, self.beacon_hz)?;
                    self.state = GsState::ListenBeacon;
                }
            }
        }
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: MacGsArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelMACgs on node {} needs num_packets, timeout, beacon_frequency, \
             downlink_frequency: {e}",
            node.node_id()
        ))
    })?;
    Ok(Box::new(ModelMacGs {
        owner: Arc::downgrade(node),
        logger,
        num_packets: args.num_packets,
        timeout_s: args.timeout,
        beacon_hz: args.beacon_frequency,
        downlink_hz: args.downlink_frequency,
        state: GsState::ListenBeacon,
        received_ids: HashSet::new(),
        listening_radio: -1,
        last_rx_time: None,
        sequence: 0,
    }))
}
