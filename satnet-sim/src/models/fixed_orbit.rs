//! Pinned-position orbital model: the satellite sits at one geodetic point
//! with a fixed lighting state. Used for static scenarios and tests where
//! real propagation would only add noise.

use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::{Location, Time};

use crate::error::SimError;
use crate::logging::Logger;
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Deserialize)]
struct FixedOrbitArgs {
    lat: f64,
    lon: f64,
    alt: f64,
    sunlit: bool,
}

pub struct ModelFixedOrbit {
    owner: Weak<Node>,
    position: Location,
    sunlit: bool,
}

impl ModelFixedOrbit {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("fixed orbit model lost its owner node".into()))
    }
}

impl Model for ModelFixedOrbit {
    fn name(&self) -> &'static str {
        "ModelFixedOrbit"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["SatelliteBasic"]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::InSunlight => Ok(ApiValue::Bool(self.sunlit)),
            ModelApi::GetPosition { time } => {
                self.owner()?.update_position(self.position, time);
                Ok(ApiValue::Position(self.position))
            }
            ModelApi::GetVelocity { .. } => Ok(ApiValue::Velocity([0.0, 0.0, 0.0])),
            ModelApi::GetPasses { ground, start, end, min_elevation_deg } => {
                // A pinned satellite is either always or never in view
                let ground_pos = ground.get_position(Some(start))?;
                let visible =
                    self.position.altitude_angle_deg(&ground_pos) >= min_elevation_deg;
                let passes: Vec<(Time, Time)> =
                    if visible { vec![(start, end)] } else { Vec::new() };
                Ok(ApiValue::Passes(passes))
            }
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    _logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: FixedOrbitArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelFixedOrbit on node {} needs lat, lon, alt, sunlit: {e}",
            node.node_id()
        ))
    })?;
    Ok(Box::new(ModelFixedOrbit {
        owner: Arc::downgrade(node),
        position: Location::from_lat_lon(args.lat, args.lon, args.alt),
        sunlit: args.sunlit,
    }))
}
