//! On-board transmit scheduler: holds the per-node schedule installed by an
//! external pre-pass scheduler through the runtime API, and answers "who is
//! my target right now".

use std::sync::{Arc, Weak};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag, ScheduleEntry};
use crate::node::Node;

pub struct ModelScheduler {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    /// Sorted by start; later installs replace the whole schedule
    entries: Vec<ScheduleEntry>,
}

impl Model for ModelScheduler {
    fn name(&self) -> &'static str {
        "ModelScheduler"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Scheduler
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::SetSchedule { mut entries } => {
                entries.sort_by_key(|e| e.start);
                if let Some(owner) = self.owner.upgrade() {
                    self.logger.log(
                        LogLevel::Info,
                        Some(&owner.timestamp()),
                        Some(self.name()),
                        &format!("Installed schedule with {} windows", entries.len()),
                    )?;
                }
                self.entries = entries;
                Ok(ApiValue::None)
            }
            ModelApi::GetTarget { at } => {
                let target = self
                    .entries
                    .iter()
                    .find(|e| e.start <= at && at <= e.end)
                    .map(|e| e.target_node);
                Ok(ApiValue::Target(target))
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
    logger: Arc<Logger>,
    _args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    Ok(Box::new(ModelScheduler {
        owner: Arc::downgrade(node),
        logger,
        entries: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use satnet_types::{Location, NodeKind, Time};

    #[test]
    fn target_follows_installed_windows() {
        let t0 = Time::from_str("2023-01-01 00:00:00").unwrap();
        let logger = Arc::new(Logger::cmd(LogLevel::Error, "sched-test"));
        let node = Node::new_ground(
            "GSBasic",
            NodeKind::GroundStation,
            1,
            0,
            Location::from_lat_lon(0.0, 0.0, 0.0),
            1.0,
            t0,
            t0.add_seconds(600.0),
            logger.clone(),
        );
        let scheduler = init(&node, logger, &serde_json::Value::Null).unwrap();
        node.install_models(vec![scheduler]).unwrap();

        node.call_model_by_tag(
            ModelTag::Scheduler,
            ModelApi::SetSchedule {
                entries: vec![
                    ScheduleEntry { start: t0, end: t0.add_seconds(60.0), target_node: 4 },
                    ScheduleEntry {
                        start: t0.add_seconds(120.0),
                        end: t0.add_seconds(180.0),
                        target_node: 9,
                    },
                ],
            },
        )
        .unwrap();

        let at = |s: f64| {
            node.call_model_by_tag(ModelTag::Scheduler, ModelApi::GetTarget { at: t0.add_seconds(s) })
                .unwrap()
        };
        assert!(matches!(at(30.0), ApiValue::Target(Some(4))));
        assert!(matches!(at(90.0), ApiValue::Target(None)));
        assert!(matches!(at(150.0), ApiValue::Target(Some(9))));
    }
}
