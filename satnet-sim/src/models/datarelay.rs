//! Relay: everything the radio receives goes straight back out through its
//! transmit queue. Used on bent-pipe relay satellites.

use std::sync::{Arc, Weak};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

pub struct ModelDataRelay {
    owner: Weak<Node>,
    logger: Arc<Logger>,
}

impl ModelDataRelay {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("data relay lost its owner node".into()))
    }
}

impl Model for ModelDataRelay {
    fn name(&self) -> &'static str {
        "ModelDataRelay"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataStore
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[&[
            "ModelLoraRadio",
            "ModelDownlinkRadio",
            "ModelAggregatorRadio",
            "ModelImagingRadio",
        ]]
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
        while let Some(unit) = owner
            .call_model_by_tag(ModelTag::Radio, ModelApi::GetReceivedPacket)?
            .into_packet()?
        {
            self.logger.log(
                LogLevel::Info,
                Some(&now),
                Some(self.name()),
                &format!("Received and Moving to Transmit packet {}", unit.header().id),
            )?;
            let queued = owner
                .call_model_by_tag(ModelTag::Radio, ModelApi::AddPacketToTransmit { packet: unit })?
                .as_bool()?;
            if !queued {
                self.logger.log(
                    LogLevel::Info,
                    Some(&now),
                    Some(self.name()),
                    "Dropping relayed unit for radio queue denial",
                )?;
            }
        }
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    _args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    Ok(Box::new(ModelDataRelay {
        owner: Arc::downgrade(node),
        logger,
    }))
}
