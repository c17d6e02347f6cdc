//! A labelled set of nodes with id- and kind-based lookup.

use std::collections::HashMap;
use std::sync::Arc;

use satnet_types::NodeKind;

use crate::error::SimError;
use crate::node::Node;

pub struct Topology {
    name: String,
    id: u32,
    nodes: Vec<Arc<Node>>,
    by_id: HashMap<u32, usize>,
}

impl Topology {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            nodes: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_node(&mut self, node: Arc<Node>) -> Result<(), SimError> {
        if self.by_id.contains_key(&node.node_id()) {
            return Err(SimError::Config(format!(
                "node id {} already exists in topology {}",
                node.node_id(),
                self.id
            )));
        }
        self.by_id.insert(node.node_id(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn node(&self, node_id: u32) -> Option<&Arc<Node>> {
        self.by_id.get(&node_id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == kind)
            .cloned()
            .collect()
    }
}
