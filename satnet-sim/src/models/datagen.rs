//! Poisson traffic source: sensor data units arrive at a configured daily
//! rate and queue until the MAC pulls them.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use rand_distr::{Distribution, Poisson};
use serde::Deserialize;

use satnet_types::{DataKind, DataUnit};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Deserialize)]
struct DataGenArgs {
    /// Expected arrivals per day
    data_poisson_lambda: f64,
    /// Payload size of one unit, bytes
    data_size: u32,
}

pub struct ModelDataGenerator {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    data_size: u32,
    /// Poisson over one step; absent when the configured rate is zero
    per_step: Option<Poisson<f64>>,
    queue: VecDeque<DataUnit>,
}

impl ModelDataGenerator {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("data generator lost its owner node".into()))
    }
}

impl Model for ModelDataGenerator {
    fn name(&self) -> &'static str {
        "ModelDataGenerator"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataGenerator
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::GetData => Ok(ApiValue::Data(self.queue.pop_front())),
            ModelApi::GetQueueSize => Ok(ApiValue::Size(self.queue.len())),
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        let Some(per_step) = &self.per_step else {
            return Ok(());
        };
        let owner = self.owner()?;
        let now = owner.timestamp();
        let arrivals = per_step.sample(&mut rand::thread_rng()) as u64;
        for _ in 0..arrivals {
            let unit = DataUnit::new(now, owner.node_id(), self.data_size, DataKind::Sensor);
            self.queue.push_back(unit);
            self.logger.log(
                LogLevel::Info,
                Some(&now),
                Some(self.name()),
                &format!(
                    "Generated dataID: {}. queueSize: {}",
                    self.queue.back().expect("just pushed").id,
                    self.queue.len()
                ),
            )?;
        }
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: DataGenArgs = serde_json::from_value(args.clone()).map_err(|e| {
        SimError::Config(format!(
            "ModelDataGenerator on node {} needs data_poisson_lambda and data_size: {e}",
            node.node_id()
        ))
    })?;
    let rate_per_step = args.data_poisson_lambda * node.delta_s() / SECONDS_PER_DAY;
    let per_step = if rate_per_step > 0.0 {
        Some(Poisson::new(rate_per_step).map_err(|e| {
            SimError::Config(format!(
                "ModelDataGenerator on node {}: bad poisson rate: {e}",
                node.node_id()
            ))
        })?)
    } else {
        None
    };
    Ok(Box::new(ModelDataGenerator {
        owner: Arc::downgrade(node),
        logger,
        data_size: args.data_size,
        per_step,
        queue: VecDeque::new(),
    }))
}
