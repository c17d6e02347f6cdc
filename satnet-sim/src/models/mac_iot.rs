//! End-device MAC: wait for data, listen for a beacon, back off, transmit,
//! and retransmit until the matching ack arrives.

use std::sync::{Arc, Weak};

use rand::Rng;
use serde::Deserialize;

use satnet_types::{MacHeader, MacUnit, Time, BROADCAST_RADIO};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IotState {
    /// Nothing to send; poll the data generator
    NoData,
    /// Data in hand, listening on the beacon frequency
    AwaitBeacon,
    /// Beacon heard; choose a random backoff
    PickBackoff,
    /// Waiting out the backoff on the uplink frequency
    InBackoff,
    /// Backoff expired; transmit
    Sending,
    /// Sent; waiting for the matching ack (checked at the start of the
    /// next step, against the previous step's receptions)
    AwaitAck,
}

#[derive(Debug, Deserialize)]
struct MacIotArgs {
    backoff_time: u32,
    retransmit_time: f64,
    beacon_frequency: f64,
    uplink_frequency: f64,
}

pub struct ModelMacIot {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    backoff_s: u32,
    retransmit_s: f64,
    beacon_hz: f64,
    uplink_hz: f64,
    state: IotState,
    current: Option<MacUnit>,
    transmit_time: Option<Time>,
    sequence: u32,
}

impl ModelMacIot {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("IoT MAC lost its owner node".into()))
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

    fn ack_received(&self, received: &[MacUnit]) -> bool {
        let Some(current) = &self.current else { return false };
        received.iter().any(|unit| {
            matches!(unit, MacUnit::Ack { received_mac_id, .. }
                if *received_mac_id == current.header().id)
        })
    }
}

impl Model for ModelMacIot {
    fn name(&self) -> &'static str {
        "ModelMACiot"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["IoTBasic"]
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[
            &["ModelLoraRadio", "ModelDownlinkRadio", "ModelAggregatorRadio"],
            &["ModelDataGenerator"],
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
        // Drained once; several states below consult it
        let received = self.drain_rx(&owner)?;

        // The ack wait inspects the previous step's receptions first
        if self.state == IotState::AwaitAck {
            if self.ack_received(&received) {
                self.log(&owner, "Ack received")?;
                self.state = IotState::NoData;
            } else if self
                .transmit_time
                .map(|t| t.add_seconds(self.retransmit_s) <= now)
                .unwrap_or(false)
            {
                self.log(&owner, "Timeout on ack. Retransmitting")?;
                self.state = IotState::AwaitBeacon;
            } else {
                return Ok(());
            }
        }

        if self.state == IotState::NoData {
            let data = owner
                .call_model_by_tag(ModelTag::DataGenerator, ModelApi::GetData)?
                .into_data()?;
            let Some(data) = data else { return Ok(()) };
            let payload = bincode::serialize(&data)?;
            let header = MacHeader::new(
                now,
                self.radio_id(&owner)?,
                BROADCAST_RADIO,
                self.sequence,
                data.size + 4,
            );
            self.sequence += 1;
            self.current = Some(MacUnit::Data { header, payload });
            self.set_frequency(&owner, self.beacon_hz)?;
            self.state = IotState::AwaitBeacon;
        }

        if self.state == IotState::AwaitBeacon {
            self.set_frequency(&owner, self.beacon_hz)?;
            let beacon_heard = received.iter().any(|u| matches!(u, MacUnit::Beacon { .. }));
            if beacon_heard {
                self.log(&owner, &format!("Beacons received: {}", received.len()))?;
                self.state = IotState::PickBackoff;
            } else {
                return Ok(());
            }
        }

        if self.state == IotState::PickBackoff {
            let backoff = rand::thread_rng().gen_range(0..=self.backoff_s);
            let until = now.add_seconds(backoff as f64);
            self.log(&owner, &format!("Backing off till: {until}"))?;
            self.transmit_time = Some(until);
            self.state = IotState::InBackoff;
            self.set_frequency(&owner, self.uplink_hz)?;
        }

        if self.state == IotState::InBackoff {
            let due = self.transmit_time.map(|t| t <= now).unwrap_or(true);
            if due {
                self.state = IotState::Sending;
            } else {
                return Ok(());
            }
        }

        if self.state == IotState::Sending {
            let packet = self.current.clone().ok_or_else(|| {
                SimError::Dependency("IoT MAC in sending state without a unit".into())
            })?;
            let sent = owner
                .call_model_by_tag(
                    ModelTag::Radio,
                    ModelApi::SendPacket { packet: Some(packet), destination: None },
                )?
                .as_bool()?;
            if sent {
                self.state = IotState::AwaitAck;
            } else {
                // Likely out of range again; wait for the next beacon
                self.state = IotState::AwaitBeacon;
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
    let args: MacIotArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelMACiot on node {} needs backoff_time, retransmit_time, beacon_frequency, \
             uplink_frequency: {e}",
            node.node_id()
        ))
    })?;
    Ok(Box::new(ModelMacIot {
        owner: Arc::downgrade(node),
        logger,
        backoff_s: args.backoff_time,
        retransmit_s: args.retransmit_time,
        beacon_hz: args.beacon_frequency,
        uplink_hz: args.uplink_frequency,
        state: IotState::NoData,
        current: None,
        transmit_time: None,
        sequence: 0,
    }))
}
