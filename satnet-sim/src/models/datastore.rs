//! Bounded store of data units. Every queue movement is logged with the
//! unit's age so the offline analyzers can reconstruct delivery delays.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::DataUnit;

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

#[derive(Debug, Deserialize, Default)]
struct DataStoreArgs {
    /// Negative or absent means unbounded
    #[serde(default)]
    queue_size: Option<i64>,
}

pub struct ModelDataStore {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    max_queue: Option<usize>,
    queue: VecDeque<DataUnit>,
}

impl ModelDataStore {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("data store lost its owner node".into()))
    }

    fn log_movement(&self, action: &str, unit: &DataUnit) -> Result<(), SimError> {
        let owner = self.owner()?;
        let now = owner.timestamp();
        self.logger.log(
            LogLevel::Info,
            Some(&now),
            Some(self.name()),
            &format!(
                "{action} dataID: {}. creationTime: {}. sourceNodeID: {}. timeDelay: {}. \
                 queueSize: {}",
                unit.id,
                unit.created,
                unit.source_node,
                now.diff_seconds(&unit.created),
                self.queue.len()
            ),
        )?;
        Ok(())
    }

    fn add(&mut self, unit: DataUnit) -> Result<bool, SimError> {
        if self.max_queue.is_some_and(|max| self.queue.len() >= max) {
            self.log_movement("Dropping", &unit)?;
            return Ok(false);
        }
        self.log_movement("Queuing", &unit)?;
        self.queue.push_back(unit);
        Ok(true)
    }
}

impl Model for ModelDataStore {
    fn name(&self) -> &'static str {
        "ModelDataStore"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataStore
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::AddData { data } => Ok(ApiValue::Bool(self.add(data)?)),
            ModelApi::GetData => {
                let unit = self.queue.pop_front();
                if let Some(unit) = &unit {
                    self.log_movement("Dequeuing", unit)?;
                }
                Ok(ApiValue::Data(unit))
            }
            ModelApi::GetQueueSize => Ok(ApiValue::Size(self.queue.len())),
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
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: DataStoreArgs = serde_json::from_value(args.clone()).unwrap_or_default();
    let max_queue = match args.queue_size {
        Some(size) if size >= 0 => Some(size as usize),
        _ => None,
    };
    Ok(Box::new(ModelDataStore {
        owner: Arc::downgrade(node),
        logger,
        max_queue,
        queue: VecDeque::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use satnet_types::{DataKind, Location, NodeKind, Time};

    fn store_node(queue_size: i64) -> Arc<Node> {
        let t0 = Time::from_str("2023-01-01 00:00:00").unwrap();
        let logger = Arc::new(Logger::cmd(LogLevel::Error, "store-test"));
        let node = Node::new_ground(
            "GSBasic",
            NodeKind::GroundStation,
            5,
            0,
            Location::from_lat_lon(0.0, 0.0, 0.0),
            1.0,
            t0,
            t0.add_seconds(60.0),
            logger.clone(),
        );
        let store = init(&node, logger, &serde_json::json!({"queue_size": queue_size})).unwrap();
        node.install_models(vec![store]).unwrap();
        node
    }

    #[test]
    fn bounded_queue_drops_overflow() {
        let node = store_node(1);
        let t0 = node.timestamp();
        let first = DataUnit::new(t0, 9, 20, DataKind::Sensor);
        let second = DataUnit::new(t0, 9, 20, DataKind::Sensor);
        let first_id = first.id;

        let added = node
            .call_model_by_tag(ModelTag::DataStore, ModelApi::AddData { data: first })
            .unwrap()
            .as_bool()
            .unwrap();
        assert!(added);
        let added = node
            .call_model_by_tag(ModelTag::DataStore, ModelApi::AddData { data: second })
            .unwrap()
            .as_bool()
            .unwrap();
        assert!(!added, "second unit exceeds the one-slot queue");

        let unit = node
            .call_model_by_tag(ModelTag::DataStore, ModelApi::GetData)
            .unwrap()
            .into_data()
            .unwrap()
            .expect("first unit still queued");
        assert_eq!(unit.id, first_id);
        let empty = node
            .call_model_by_tag(ModelTag::DataStore, ModelApi::GetData)
            .unwrap()
            .into_data()
            .unwrap();
        assert!(empty.is_none());
    }
}
