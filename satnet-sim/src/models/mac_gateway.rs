//! Gateway-satellite MAC: ack every data unit arriving on the uplink
//! aggregator radio and hand the payload to the on-board store.

use std::sync::{Arc, Weak};

use satnet_types::{DataUnit, MacHeader, MacUnit};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

const UPLINK_RADIO: &str = "ModelAggregatorRadio";

pub struct ModelMacGateway {
    owner: Weak<Node>,
    logger: Arc<Logger>,
}

impl ModelMacGateway {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("gateway MAC lost its owner node".into()))
    }

    fn drain_rx(&self, owner: &Node) -> Result<Vec<MacUnit>, SimError> {
        let mut received = Vec::new();
        while let Some(unit) = owner
            .call_model_by_name(UPLINK_RADIO, ModelApi::GetReceivedPacket)?
            .into_packet()?
        {
            received.push(unit);
        }
        Ok(received)
    }
}

impl Model for ModelMacGateway {
    fn name(&self) -> &'static str {
        "ModelMACgateway"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["SatelliteBasic"]
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[&["ModelAggregatorRadio"], &["ModelDataStore"]]
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
        if received.is_empty() {
            return Ok(());
        }
        if received.len() > 1 {
            // One uplink unit per step is the designed granularity
            return Err(SimError::Dependency(format!(
                "gateway on node {} received {} units in one step; refine the time delta",
                owner.node_id(),
                received.len()
            )));
        }
        let unit = received.into_iter().next().expect("one unit");
        let MacUnit::Data { header, payload } = unit else {
            return Ok(());
        };
        self.logger.log(
            LogLevel::Info,
            Some(&now),
            Some(self.name()),
            &format!("Received MACData with ID {}", header.id),
        )?;

        let uplink_radio_id = owner
            .call_model_by_name(UPLINK_RADIO, ModelApi::GetRadioDevice)?
            .into_device()?
            .address();
        let ack = MacUnit::Ack {
            header: MacHeader::new(
                now,
                uplink_radio_id,
                header.source_radio as i64,
                header.sequence + 1,
                4,
            ),
            received_mac_id: header.id,
        };
        self.logger.log(
            LogLevel::Info,
            Some(&now),
            Some(self.name()),
            &format!("Sending ACK with ID {}", ack.header().id),
        )?;
        let sent = owner
            .call_model_by_name(
                UPLINK_RADIO,
                ModelApi::SendPacket { packet: Some(ack), destination: None },
            )?
            .as_bool()?;
        if !sent {
            // Device moved out of range or out of power; nothing to do
            self.logger.log(
                LogLevel::Warn,
                Some(&now),
                Some(self.name()),
                &format!("Could not send ack for MACData with ID {}", header.id),
            )?;
        }

        let data: DataUnit = bincode::deserialize(&payload)?;
        owner.call_model_by_tag(ModelTag::DataStore, ModelApi::AddData { data })?;
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    _args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    Ok(Box::new(ModelMacGateway {
        owner: Arc::downgrade(node),
        logger,
    }))
}
