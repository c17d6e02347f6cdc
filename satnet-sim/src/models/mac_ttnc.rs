//! Downlink-satellite MAC (TTnC): periodic beacons, then serve ground
//! station download requests, holding every sent unit until it shows up in a
//! bulk ack.

use std::sync::{Arc, Weak};

use rand::Rng;
use serde::Deserialize;

use satnet_types::{MacHeader, MacUnit, Time, BROADCAST_RADIO};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

const DOWNLINK_RADIO: &str = "ModelDownlinkRadio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TtncState {
    /// Waiting for the next beacon slot
    BeaconWait,
    /// Beacon out; listening for a control or a bulk ack
    AwaitFeedback,
    /// Serving a control: one data unit per step while the radio is free,
    /// then a terminal control
    Serving,
}

#[derive(Debug, Deserialize)]
struct MacTtncArgs {
    beacon_interval: u32,
    beacon_backoff: u32,
    beacon_frequency: f64,
    downlink_frequency: f64,
}

pub struct ModelMacTtnc {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    beacon_interval_s: u32,
    beacon_backoff_s: u32,
    beacon_hz: f64,
    downlink_hz: f64,
    state: TtncState,
    /// Units to push out for the current control request, in order
    data_to_send: Vec<MacUnit>,
    /// Units on the air or unacknowledged; retried on the next control
    sent_data: Vec<MacUnit>,
    sequence: u32,
    gs_radio_id: i64,
    next_beacon: Option<Time>,
}

impl ModelMacTtnc {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("TTnC MAC lost its owner node".into()))
    }

    fn log(&self, owner: &Node, msg: &str) -> Result<(), SimError> {
        self.logger
            .log(LogLevel::Info, Some(&owner.timestamp()), Some(self.name()), msg)?;
        Ok(())
    }

    fn drain_rx(&self, owner: &Node) -> Result<Vec<MacUnit>, SimError> {
        let mut received = Vec::new();
        while let Some(unit) = owner
            .call_model_by_name(DOWNLINK_RADIO, ModelApi::GetReceivedPacket)?
            .into_packet()?
        {
            received.push(unit);
        }
        Ok(received)
    }

    fn radio_id(&self, owner: &Node) -> Result<u32, SimError> {
        Ok(owner
            .call_model_by_name(DOWNLINK_RADIO, ModelApi::GetRadioDevice)?
            .into_device()?
            .address())
    }

    fn send_beacon(&mut self, owner: &Node) -> Result<(), SimError> {
        owner.call_model_by_name(
            DOWNLINK_RADIO,
            ModelApi::SetFrequency { hz: self.beacon_hz },
        )?;
        let now = owner.timestamp();
        let beacon = MacUnit::Beacon {
            header: MacHeader::new(now, self.radio_id(owner)?, BROADCAST_RADIO, 0, 8),
            devices_in_view: 0,
        };
        owner.call_model_by_name(
            DOWNLINK_RADIO,
            ModelApi::SendPacket { packet: Some(beacon), destination: None },
        )?;
        let jitter = rand::thread_rng().gen_range(0..=self.beacon_backoff_s);
        self.next_beacon = Some(now.add_seconds((self.beacon_interval_s + jitter) as f64));
        // Controls, acks and data all live on the downlink frequency
        owner.call_model_by_name(
            DOWNLINK_RADIO,
            ModelApi::SetFrequency { hz: self.downlink_hz },
        )?;
        Ok(())
    }
}

impl Model for ModelMacTtnc {
    fn name(&self) -> &'static str {
        "ModelMACTTnC"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["SatelliteBasic"]
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
        let radio_id = self.radio_id(&owner)?;

        // First beacon slot: interval plus jitter past the simulation start
        if self.next_beacon.is_none() {
            let jitter = rand::thread_rng()
                .gen_range(self.beacon_interval_s..=self.beacon_interval_s + self.beacon_backoff_s);
            self.next_beacon = Some(now.add_seconds(jitter as f64));
        }

        if self.state == TtncState::BeaconWait {
            if now >= self.next_beacon.expect("set above") {
                self.log(&owner, "Sending beacon")?;
                self.send_beacon(&owner)?;
                self.state = TtncState::AwaitFeedback;
            }
        } else if self.state == TtncState::AwaitFeedback {
            let controls: Vec<(i64, u32)> = received
                .iter()
                .filter_map(|u| match u {
                    MacUnit::Control { header, num_packets }
                        if header.intended_radio == radio_id as i64 =>
                    {
                        Some((header.source_radio as i64, *num_packets))
                    }
                    _ => None,
                })
                .collect();
            let acks: Vec<&MacUnit> = received
                .iter()
                .filter(|u| {
                    matches!(u, MacUnit::BulkAck { header, .. }
                        if header.intended_radio == radio_id as i64)
                })
                .collect();

            if !controls.is_empty() {
                // Several ground stations may ask at once; serve the largest
                // request
                let (gs_radio, num_wanted) =
                    *controls.iter().max_by_key(|(_, n)| *n).expect("non-empty");
                self.gs_radio_id = gs_radio;
                self.log(&owner, &format!("Received control packet from radio {gs_radio}"))?;

                // Anything never acked goes out first
                self.data_to_send = std::mem::take(&mut self.sent_data);
                while (self.data_to_send.len() as u32) < num_wanted {
                    let data = owner
                        .call_model_by_tag(ModelTag::DataStore, ModelApi::GetData)?
                        .into_data()?;
                    let Some(data) = data else { break };
                    let payload = bincode::serialize(&data)?;
                    let header = MacHeader::new(
                        now,
                        radio_id,
                        self.gs_radio_id,
                        self.sequence,
                        data.size + 4,
                    );
                    self.sequence += 1;
                    self.data_to_send.push(MacUnit::Data { header, payload });
                }
                self.state = TtncState::Serving;
            } else if !acks.is_empty() {
                let acked_ids: Vec<u64> = acks
                    .iter()
                    .filter_map(|u| match u {
                        MacUnit::BulkAck { received_mac_ids, .. } => Some(received_mac_ids.clone()),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                self.log(&owner, &format!("Received bulk ack for {acked_ids:?}"))?;
                let mut kept = Vec::new();
                for unit in std::mem::take(&mut self.sent_data) {
                    if acked_ids.contains(&unit.header().id) {
                        self.log(&owner, &format!("Received ack for mac unit {}", unit.header().id))?;
                    } else {
                        kept.push(unit);
                    }
                }
                self.sent_data = kept;
                self.state = TtncState::BeaconWait;
            } else if now >= self.next_beacon.expect("set above") {
                self.log(&owner, "Timed out waiting for feedback. Resending beacon")?;
                self.state = TtncState::BeaconWait;
            }
        }

        // Entered directly after a control arrives, so the first unit goes
        // out in the same step
        if self.state == TtncState::Serving {
            if let Some(first) = self.data_to_send.first().cloned() {
                let sent = owner
                    .call_model_by_name(
                        DOWNLINK_RADIO,
                        ModelApi::SendPacket { packet: Some(first), destination: None },
                    )?
                    .as_bool()?;
                if sent {
                    let unit = self.data_to_send.remove(0);
                    self.log(
                        &owner,
                        &format!(
                            "Sent MACData {} to radio {}",
                            unit.header().id,
                            self.gs_radio_id
                        ),
                    )?;
                    self.sent_data.push(unit);
                }
            } else {
                self.log(
                    &owner,
                    &format!(
                        "Sending Control. Sent {} packets to radio {}",
                        self.sent_data.len(),
                        self.gs_radio_id
                    ),
                )?;
                let control = MacUnit::Control {
                    header: MacHeader::new(now, radio_id, self.gs_radio_id, self.sequence, 8),
                    num_packets: self.sent_data.len() as u32,
                };
                let sent = owner
                    .call_model_by_name(
                        DOWNLINK_RADIO,
                        ModelApi::SendPacket { packet: Some(control), destination: None },
                    )?
                    .as_bool()?;
                if sent {
                    self.state = TtncState::AwaitFeedback;
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
    let args: MacTtncArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelMACTTnC on node {} needs beacon_interval, beacon_backoff, beacon_frequency, \
             downlink_frequency: {e}",
            node.node_id()
        ))
    })?;
    Ok(Box::new(ModelMacTtnc {
        owner: Arc::downgrade(node),
        logger,
        beacon_interval_s: args.beacon_interval,
        beacon_backoff_s: args.beacon_backoff,
        beacon_hz: args.beacon_frequency,
        downlink_hz: args.downlink_frequency,
        state: TtncState::BeaconWait,
        data_to_send: Vec::new(),
        sent_data: Vec::new(),
        sequence: 0,
        gs_radio_id: -1,
        next_beacon: None,
    }))
}
