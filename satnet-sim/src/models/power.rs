//! Energy budget: a joule bank charged by solar generation while sunlit and
//! drained by tagged consumers. Emits one `PowerStats` summary line per step
//! for the analytics pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::Deserialize;

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, EnergyRequest, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Deserialize)]
struct PowerArgs {
    /// Tag → draw in watts
    power_consumption: HashMap<String, f64>,
    power_configurations: PowerConfigurations,
    /// Source → generation in watts; only `SOLAR` is understood
    power_generations: HashMap<String, f64>,
    #[serde(default = "default_efficiency")]
    efficiency: f64,
    #[serde(default)]
    always_on: Vec<String>,
    /// Tag → minimum bank level in joules required to grant `has_energy`
    #[serde(default)]
    required_energy: HashMap<String, f64>,
}

fn default_efficiency() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct PowerConfigurations {
    #[serde(rename = "MAX_CAPACITY")]
    max_capacity_j: f64,
    #[serde(rename = "MIN_CAPACITY")]
    min_capacity_j: f64,
    #[serde(rename = "INITIAL_CAPACITY")]
    initial_capacity_j: f64,
}

pub struct ModelPower {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    consumption_w: HashMap<String, f64>,
    required_j: HashMap<String, f64>,
    always_on: Vec<String>,
    generation_w: f64,
    efficiency: f64,
    current_j: f64,
    max_j: f64,
    min_j: f64,
    delta_s: f64,
    // Per-step stats, reset after every summary line
    logging_tags: Vec<String>,
    requested: HashMap<String, bool>,
    granted: HashMap<String, Option<bool>>,
    consumed: HashMap<String, f64>,
    generated_j: f64,
    out_of_power: bool,
}

impl ModelPower {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("power model lost its owner node".into()))
    }

    fn register_tag(&mut self, tag: &str) {
        if !self.logging_tags.iter().any(|t| t == tag) {
            self.logging_tags.push(tag.to_string());
            self.requested.insert(tag.to_string(), false);
            self.granted.insert(tag.to_string(), None);
            self.consumed.insert(tag.to_string(), 0.0);
        }
    }

    fn consume(&mut self, request: EnergyRequest) -> Result<bool, SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();
        let (energy_j, stats_tag) = match request {
            EnergyRequest::Joules(j) => (j, "Other".to_string()),
            EnergyRequest::Power { watts, duration_s } => (watts * duration_s, "Other".to_string()),
            EnergyRequest::Tagged { tag, duration_s } => {
                match self.consumption_w.get(&tag).copied() {
                    Some(watts) => (watts * duration_s, tag),
                    None => {
                        self.logger.log(
                            LogLevel::Info,
                            Some(&now),
                            Some(self.name()),
                            &format!(
                                "Power consumption tag {tag} is not provided. Assuming this uses 0 power"
                            ),
                        )?;
                        // Register so the warning fires once per tag
                        self.register_tag(&tag);
                        self.consumption_w.insert(tag.clone(), 0.0);
                        (0.0, tag)
                    }
                }
            }
        };

        let granted = self.current_j >= energy_j + self.min_j;
        if granted {
            self.current_j -= energy_j;
        } else {
            self.logger.log(
                LogLevel::Info,
                Some(&now),
                Some(self.name()),
                &format!(
                    "Not enough power to consume. Current charge: {} J, Required charge: {} J",
                    self.current_j, energy_j
                ),
            )?;
        }
        self.register_tag(&stats_tag);
        *self.consumed.entry(stats_tag).or_insert(0.0) += if granted { energy_j } else { 0.0 };
        Ok(granted)
    }

    fn has_energy(&mut self, tag: &str) -> Result<bool, SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();
        let granted = match self.required_j.get(tag).copied() {
            Some(required) => self.current_j >= required,
            None => {
                self.logger.log(
                    LogLevel::Warn,
                    Some(&now),
                    Some(self.name()),
                    &format!(
                        "Power consumption tag {tag} not found in the requiredEnergy dictionary. \
                         Assuming this can always run if there is any power"
                    ),
                )?;
                self.register_tag(tag);
                self.required_j.insert(tag.to_string(), 0.0);
                self.current_j > self.min_j
            }
        };
        self.register_tag(tag);
        self.requested.insert(tag.to_string(), true);
        self.granted.insert(tag.to_string(), Some(granted));
        Ok(granted)
    }

    fn log_stats(&mut self) -> Result<(), SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();
        let mut line = format!(
            "PowerStats. CurrentCharge: [{}] J. ChargeGenerated: [{}] J. OutOfPower: [{}]. ",
            self.current_j, self.generated_j, self.out_of_power
        );
        for tag in &self.logging_tags {
            let requested = self.requested.get(tag).copied().unwrap_or(false);
            let granted = match self.granted.get(tag).copied().flatten() {
                Some(true) => "true",
                Some(false) => "false",
                None => "None",
            };
            let consumed = self.consumed.get(tag).copied().unwrap_or(0.0);
            line.push_str(&format!(
                "Tag: [{tag}]. Requested: [{requested}]. Granted: [{granted}]. Consumed: [{consumed}]. "
            ));
        }
        self.logger.log(LogLevel::Info, Some(&now), Some(self.name()), &line)?;

        for tag in &self.logging_tags {
            self.requested.insert(tag.clone(), false);
            self.granted.insert(tag.clone(), None);
            self.consumed.insert(tag.clone(), 0.0);
        }
        self.generated_j = 0.0;
        self.out_of_power = false;
        Ok(())
    }
}

impl Model for ModelPower {
    fn name(&self) -> &'static str {
        "ModelPower"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Power
    }

    fn dependencies(&self) -> &'static [&'static [&'static str]] {
        &[&["ModelFixedOrbit", "ModelOrbit"]]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::ConsumeEnergy(request) => Ok(ApiValue::Bool(self.consume(request)?)),
            ModelApi::HasEnergy { tag } => Ok(ApiValue::Bool(self.has_energy(&tag)?)),
            ModelApi::GetAvailableEnergy => Ok(ApiValue::F64(self.current_j)),
            ModelApi::GetMinCharge => Ok(ApiValue::F64(self.min_j)),
            ModelApi::GetMaxCharge => Ok(ApiValue::F64(self.max_j)),
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        let owner = self.owner()?;
        let before = self.current_j;

        let sunlit = owner
            .call_model_by_tag(ModelTag::Orbital, ModelApi::InSunlight)?
            .as_bool()?;
        if sunlit {
            self.current_j += self.generation_w * self.delta_s * self.efficiency;
        }
        self.current_j = self.current_j.min(self.max_j);
        self.generated_j = self.current_j - before;

        for tag in self.always_on.clone() {
            let granted = self.consume(EnergyRequest::Tagged {
                tag: tag.clone(),
                duration_s: self.delta_s,
            })?;
            if !granted {
                self.logger.log(
                    LogLevel::Info,
                    Some(&owner.timestamp()),
                    Some(self.name()),
                    &format!("Not enough power to perform always on task: {tag}"),
                )?;
                self.out_of_power = true;
            }
        }

        self.log_stats()
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: PowerArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelPower on node {} needs power_consumption, power_configurations, \
             power_generations: {e}",
            node.node_id()
        ))
    })?;
    let generation_w = *args.power_generations.get("SOLAR").ok_or_else(|| {
        SimError::Config(format!(
            "ModelPower on node {} supports solar generation only; provide SOLAR in W",
            node.node_id()
        ))
    })?;

    let mut logging_tags: Vec<String> = Vec::new();
    for tag in args
        .power_consumption
        .keys()
        .chain(args.required_energy.keys())
        .chain(std::iter::once(&"Other".to_string()))
    {
        if !logging_tags.iter().any(|t| t == tag) {
            logging_tags.push(tag.clone());
        }
    }
    let requested = logging_tags.iter().map(|t| (t.clone(), false)).collect();
    let granted = logging_tags.iter().map(|t| (t.clone(), None)).collect();
    let consumed = logging_tags.iter().map(|t| (t.clone(), 0.0)).collect();

    Ok(Box::new(ModelPower {
        owner: Arc::downgrade(node),
        logger,
        consumption_w: args.power_consumption,
        required_j: args.required_energy,
        always_on: args.always_on,
        generation_w,
        efficiency: args.efficiency,
        current_j: args.power_configurations.initial_capacity_j,
        max_j: args.power_configurations.max_capacity_j,
        min_j: args.power_configurations.min_capacity_j,
        delta_s: node.delta_s(),
        logging_tags,
        requested,
        granted,
        consumed,
        generated_j: 0.0,
        out_of_power: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use satnet_types::{NodeKind, Time};

    fn test_node(sunlit: bool) -> Arc<Node> {
        let t0 = Time::from_str("2023-01-01 00:00:00").unwrap();
        let logger = Arc::new(Logger::cmd(LogLevel::Error, "power-test"));
        let node = Node::new_satellite(
            1,
            0,
            "1 25544U 98067A   20029.54791435  .00016717  00000-0  10270-3 0  9000".into(),
            "2 25544  51.6426 297.5130 0006846  83.1305 277.0652 15.49249062  9003".into(),
            1.0,
            t0,
            t0.add_seconds(60.0),
            logger.clone(),
        );
        let orbit = crate::models::fixed_orbit::init(
            &node,
            logger.clone(),
            &serde_json::json!({"lat": 0.0, "lon": 0.0, "alt": 500000.0, "sunlit": sunlit}),
        )
        .unwrap();
        let power = init(
            &node,
            logger,
            &serde_json::json!({
                "power_consumption": {"HEATER": 2.0},
                "power_configurations": {
                    "MAX_CAPACITY": 100.0, "MIN_CAPACITY": 10.0, "INITIAL_CAPACITY": 50.0
                },
                "power_generations": {"SOLAR": 5.0},
                "efficiency": 0.8,
                "always_on": ["HEATER"],
                "required_energy": {"TXRADIO": 20.0}
            }),
        )
        .unwrap();
        node.install_models(vec![orbit, power]).unwrap();
        node
    }

    #[test]
    fn sunlight_charges_and_always_on_drains() {
        let node = test_node(true);
        node.execute().unwrap();
        // +5 W × 1 s × 0.8 generation, −2 W × 1 s heater
        let available = node
            .call_model_by_tag(ModelTag::Power, ModelApi::GetAvailableEnergy)
            .unwrap()
            .as_f64()
            .unwrap();
        assert!((available - 52.0).abs() < 1e-9, "got {available}");
    }

    #[test]
    fn eclipse_only_drains() {
        let node = test_node(false);
        node.execute().unwrap();
        let available = node
            .call_model_by_tag(ModelTag::Power, ModelApi::GetAvailableEnergy)
            .unwrap()
            .as_f64()
            .unwrap();
        assert!((available - 48.0).abs() < 1e-9, "got {available}");
    }

    #[test]
    fn has_energy_checks_required_minimum() {
        let node = test_node(false);
        let granted = node
            .call_model_by_tag(ModelTag::Power, ModelApi::HasEnergy { tag: "TXRADIO".into() })
            .unwrap()
            .as_bool()
            .unwrap();
        assert!(granted, "50 J available against a 20 J floor");
    }

    #[test]
    fn consume_denied_below_min_capacity() {
        let node = test_node(false);
        let granted = node
            .call_model_by_tag(
                ModelTag::Power,
                ModelApi::ConsumeEnergy(EnergyRequest::Joules(45.0)),
            )
            .unwrap()
            .as_bool()
            .unwrap();
        assert!(!granted, "45 J would dip below the 10 J floor");
        // Denied requests leave the bank untouched
        let available = node
            .call_model_by_tag(ModelTag::Power, ModelApi::GetAvailableEnergy)
            .unwrap()
            .as_f64()
            .unwrap();
        assert_eq!(available, 50.0);
    }

    #[test]
    fn energy_delta_matches_generation_minus_consumption() {
        let node = test_node(true);
        let kind = node.kind();
        assert_eq!(kind, NodeKind::Sat);
        for _ in 0..5 {
            node.execute().unwrap();
        }
        let available = node
            .call_model_by_tag(ModelTag::Power, ModelApi::GetAvailableEnergy)
            .unwrap()
            .as_f64()
            .unwrap();
        // 5 steps × (4 J generated − 2 J heater)
        assert!((available - 60.0).abs() < 1e-9, "got {available}");
    }
}
