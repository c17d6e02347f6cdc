//! A channel is the set of radio devices that can hear one transmission at
//! one instant. The LoRa family builds a single broadcast channel out of the
//! current visibility set; the imaging family builds one two-endpoint
//! channel per visible peer.

use std::sync::Arc;

use crate::net::device::RadioDevice;

#[derive(Clone, Default)]
pub struct Channel {
    devices: Vec<Arc<RadioDevice>>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: Arc<RadioDevice>) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[Arc<RadioDevice>] {
        &self.devices
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// Node ids of every device owner on this channel.
    pub fn owner_node_ids(&self) -> Vec<u32> {
        self.devices
            .iter()
            .filter_map(|d| d.owner_node_id())
            .collect()
    }
}
