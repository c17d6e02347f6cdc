//! On-board imager: captures as many images per step as the clock, the
//! lighting and the energy budget allow. Images land in the data store at
//! the start of the *next* step, since a capture is not usable until the
//! step it was taken in has finished.

use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::{DataKind, DataUnit};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, EnergyRequest, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Deserialize)]
struct ImagerArgs {
    /// Payload size of one image, bytes
    image_size: u32,
    /// Capture time per image, seconds
    time_per_image: f64,
}

pub struct ModelImager {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    image_size: u32,
    time_per_image_s: f64,
    /// Fraction of a capture carried into the next step
    carry_over_s: f64,
    pending_images: Vec<DataUnit>,
}

impl ModelImager {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("imager lost its owner node".into()))
    }

    fn capture(&self, owner: &Node) -> Result<Option<DataUnit>, SimError> {
        let sunlit = owner
            .call_model_by_tag(ModelTag::Orbital, ModelApi::InSunlight)?
            .as_bool()?;
        if !sunlit {
            return Ok(None);
        }
        let has_energy = owner
            .call_model_by_tag(ModelTag::Power, ModelApi::HasEnergy { tag: "IMAGING".into() })?
            .as_bool()?;
        if !has_energy {
            return Ok(None);
        }
        let granted = owner
            .call_model_by_tag(
                ModelTag::Power,
                ModelApi::ConsumeEnergy(EnergyRequest::Tagged {
                    tag: "IMAGING".into(),
                    duration_s: self.time_per_image_s,
                }),
            )?
            .as_bool()?;
        if !granted {
            self.logger.log(
                LogLevel::Warn,
                Some(&owner.timestamp()),
                Some(self.name()),
                "Not enough power to take an image",
            )?;
            return Ok(None);
        }
        Ok(Some(DataUnit::new(
            owner.timestamp(),
            owner.node_id(),
            self.image_size,
            DataKind::Image,
        )))
    }
}

impl Model for ModelImager {
    fn name(&self) -> &'static str {
        "ModelImager"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Imaging
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["SatelliteBasic"]
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[
            &["ModelFixedOrbit", "ModelOrbit"],
            &["ModelDataStore", "ModelDataRelay"],
            &["ModelPower"],
        ]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::TakeImage => {
                let owner = self.owner()?;
                Ok(ApiValue::Data(self.capture(&owner)?))
            }
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        let owner = self.owner()?;

        // Hand over the previous step's captures
        for image in self.pending_images.drain(..) {
            owner.call_model_by_tag(ModelTag::DataStore, ModelApi::AddData { data: image })?;
        }

        let mut budget_s = owner.delta_s() + self.carry_over_s;
        while budget_s >= self.time_per_image_s {
            match self.capture(&owner)? {
                Some(image) => {
                    self.logger.log(
                        LogLevel::Info,
                        Some(&owner.timestamp()),
                        Some(self.name()),
                        &format!("Captured image dataID: {}", image.id),
                    )?;
                    self.pending_images.push(image);
                    budget_s -= self.time_per_image_s;
                }
                None => {
                    // No light or no energy this step; the remaining budget
                    // is lost, not banked
                    budget_s = 0.0;
                    break;
                }
            }
        }
        self.carry_over_s = budget_s;
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: ImagerArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelImager on node {} needs image_size and time_per_image: {e}",
            node.node_id()
        ))
    })?;
    if args.time_per_image <= 0.0 {
        return Err(SimError::Config(format!(
            "ModelImager on node {}: time_per_image must be positive",
            node.node_id()
        )));
    }
    Ok(Box::new(ModelImager {
        owner: Arc::downgrade(node),
        logger,
        image_size: args.image_size,
        time_per_image_s: args.time_per_image,
        carry_over_s: 0.0,
        pending_images: Vec::new(),
    }))
}
