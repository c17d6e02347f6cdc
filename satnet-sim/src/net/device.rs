//! The radio device state machine shared by both families.
//!
//! A device keeps the frames currently being received, the windows during
//! which it transmitted, and the channels it can currently reach. Sending
//! computes the full link budget per peer and hands each peer its own frame
//! copy; the per-step update resolves collisions, capture, half-duplex
//! conflicts and packet-error draws, and returns the surviving payloads.
//!
//! Lock discipline: a device never holds its own state lock while taking a
//! peer's, so concurrent cross-node sends cannot deadlock.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;

use satnet_types::{next_frame_id, Frame, Time};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{EnergyRequest, ModelApi, ModelTag};
use crate::net::channel::Channel;
use crate::net::link::{Link, PhySetup, RadioFamily};
use crate::node::Node;

const LORA_MTU: u32 = 255;
/// The capture margin: a frame this much stronger than an overlapping one
/// survives the collision.
const CAPTURE_MARGIN_DB: f64 = 6.0;
/// Preamble symbols a receiver spends locking on to a frame.
const LOCK_ON_SYMBOLS: f64 = 4.0;

struct DeviceState {
    phy: PhySetup,
    transmittable: bool,
    receivable: bool,
    channels: Vec<Channel>,
    /// Own transmission windows, pruned once reception has moved past them
    transmit_windows: Vec<(Time, Time)>,
    /// Inbound frames whose reception has not completed yet
    pending: Vec<Frame>,
}

/// One radio, owned by a radio model and addressed by a unique radio id.
pub struct RadioDevice {
    address: u32,
    family: RadioFamily,
    owner: Weak<Node>,
    logger: Arc<Logger>,
    state: Mutex<DeviceState>,
}

impl std::fmt::Debug for RadioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioDevice")
            .field("address", &self.address)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl RadioDevice {
    pub fn new(
        address: u32,
        family: RadioFamily,
        owner: Weak<Node>,
        logger: Arc<Logger>,
        phy: PhySetup,
    ) -> Arc<RadioDevice> {
        Arc::new(RadioDevice {
            address,
            family,
            owner,
            logger,
            state: Mutex::new(DeviceState {
                phy,
                transmittable: true,
                receivable: true,
                channels: Vec::new(),
                transmit_windows: Vec::new(),
                pending: Vec::new(),
            }),
        })
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn family(&self) -> RadioFamily {
        self.family
    }

    pub fn mtu(&self) -> u32 {
        match self.family {
            RadioFamily::Lora => LORA_MTU,
            // Large bulk transfers go out as single frames
            RadioFamily::Imaging => u32::MAX,
        }
    }

    fn class_name(&self) -> &'static str {
        match self.family {
            RadioFamily::Lora => "LoraRadioDevice",
            RadioFamily::Imaging => "ImagingRadioDevice",
        }
    }

    pub fn owner_node(&self) -> Option<Arc<Node>> {
        self.owner.upgrade()
    }

    pub fn owner_node_id(&self) -> Option<u32> {
        self.owner.upgrade().map(|n| n.node_id())
    }

    pub fn phy(&self) -> PhySetup {
        self.state.lock().phy.clone()
    }

    pub fn frequency_hz(&self) -> f64 {
        self.state.lock().phy.frequency_hz
    }

    pub fn set_phy_param(&self, name: &str, value: f64) -> Result<(), SimError> {
        let mut state = self.state.lock();
        match name {
            "_frequency" => state.phy.frequency_hz = value,
            "_bandwidth" => state.phy.bandwidth_hz = value,
            "_sf" => state.phy.sf = value as u8,
            "_coding_rate" => state.phy.coding_rate = value as u8,
            "_tx_power" => state.phy.tx_power_dbw = value,
            other => {
                return Err(SimError::Api(format!(
                    "unknown phy parameter `{other}` on radio {}",
                    self.address
                )))
            }
        }
        Ok(())
    }

    pub fn phy_param(&self, name: &str) -> Result<f64, SimError> {
        let state = self.state.lock();
        match name {
            "_frequency" => Ok(state.phy.frequency_hz),
            "_bandwidth" => Ok(state.phy.bandwidth_hz),
            "_sf" => Ok(state.phy.sf as f64),
            "_coding_rate" => Ok(state.phy.coding_rate as f64),
            "_tx_power" => Ok(state.phy.tx_power_dbw),
            other => Err(SimError::Api(format!(
                "unknown phy parameter `{other}` on radio {}",
                self.address
            ))),
        }
    }

    pub fn set_channels(&self, channels: Vec<Channel>) {
        self.state.lock().channels = channels;
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.state.lock().channels.clone()
    }

    pub fn set_receivable(&self, receivable: bool) {
        self.state.lock().receivable = receivable;
    }

    /// True when `now` falls inside any recorded transmission window.
    pub fn is_tx_busy(&self, now: Time) -> bool {
        self.state
            .lock()
            .transmit_windows
            .iter()
            .any(|(start, end)| *start <= now && now < *end)
    }

    // ── Send path ─────────────────────────────────────────────────────────

    /// Transmit `payload` to every other device on the selected channel.
    /// Returns `Ok(true)` when at least one copy was put on the air; physics
    /// rejections come back as `Ok(false)` with the drop reason logged.
    pub fn send(
        &self,
        payload_size: u32,
        payload: &[u8],
        channel_index: usize,
    ) -> Result<bool, SimError> {
        let owner = self
            .owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("radio device owner node dropped".into()))?;
        let now = owner.timestamp();
        let frame_id = next_frame_id();

        let mut mtu_drop = false;
        let mut busy_drop = false;
        let mut no_channel_drop = false;
        let mut snr_drop = false;
        let mut instance_ids: Vec<u32> = Vec::new();
        let mut dest_nodes: Vec<u32> = Vec::new();
        let mut dest_radios: Vec<u32> = Vec::new();
        let mut snrs: Vec<f64> = Vec::new();
        let mut toas: Vec<f64> = Vec::new();
        let mut plrs: Vec<f64> = Vec::new();
        let mut pers: Vec<f64> = Vec::new();

        // Snapshot under the lock, release before touching any peer.
        let (own_phy, channel, transmittable) = {
            let state = self.state.lock();
            let channel = state.channels.get(channel_index).cloned();
            (state.phy.clone(), channel, state.transmittable)
        };

        let mut sent = false;
        if payload_size > self.mtu() {
            mtu_drop = true;
        } else if !transmittable || self.is_tx_busy(now) {
            busy_drop = true;
        } else if let Some(channel) = channel {
            let mut instance_id: u32 = 1;
            let mut new_windows: Vec<(Time, Time)> = Vec::new();
            for peer in channel.devices() {
                if std::ptr::eq(Arc::as_ptr(peer), self as *const RadioDevice) {
                    continue;
                }
                let peer_node = peer
                    .owner
                    .upgrade()
                    .ok_or_else(|| SimError::Dependency("peer radio owner node dropped".into()))?;
                let our_position = owner.get_position(Some(now))?;
                let peer_position = peer_node.get_position(Some(now))?;
                let distance = our_position.distance(&peer_position);

                let link = Link::new(own_phy.clone(), peer.phy(), distance, self.family);
                let toa = match link.time_on_air_s(payload_size) {
                    Ok(toa) => toa,
                    Err(_) => {
                        // SNR cleared no MODCOD row; this peer is out of reach
                        snr_drop = true;
                        continue;
                    }
                };
                let delay = link.propagation_delay_s();
                let plr = link.plr();
                let per = link.per(own_phy.bits_allowed, payload_size)?;

                let frame = Frame {
                    id: frame_id,
                    instance_id,
                    source: self.address,
                    size: payload_size,
                    payload: payload.to_vec(),
                    start_tx: now,
                    end_tx: now.add_seconds(toa),
                    start_rx: now.add_seconds(delay),
                    end_rx: now.add_seconds(delay + toa),
                    plr,
                    per,
                    rssi_dbw: link.rssi_dbw(),
                    bandwidth_hz: own_phy.bandwidth_hz,
                    coding_rate: own_phy.coding_rate,
                    spreading_factor: match self.family {
                        RadioFamily::Lora => Some(own_phy.sf),
                        RadioFamily::Imaging => None,
                    },
                    collided_ids: Vec::new(),
                };
                instance_ids.push(instance_id);
                instance_id += 1;
                dest_nodes.push(peer_node.node_id());
                dest_radios.push(peer.address());
                snrs.push(link.snr_db());
                toas.push(toa);
                plrs.push(plr);
                pers.push(per);

                peer.deliver_inbound(frame)?;
                new_windows.push((now, now.add_seconds(toa)));
                sent = true;
            }
            if !new_windows.is_empty() {
                self.state.lock().transmit_windows.extend(new_windows);
            }
        } else {
            no_channel_drop = true;
        }

        // Transmission energy is charged here: only the device knows the
        // longest per-peer time on air.
        if sent {
            let max_toa = toas.iter().cloned().fold(0.0_f64, f64::max);
            owner.try_call_model_by_tag(
                ModelTag::Power,
                ModelApi::ConsumeEnergy(EnergyRequest::Tagged {
                    tag: "TXRADIO".into(),
                    duration_s: max_toa,
                }),
            )?;
        }

        self.logger.log(
            LogLevel::Info,
            Some(&now),
            Some(self.class_name()),
            &format!(
                "Transmitting. frameID: {frame_id}. sourceAddress: {}. frameSize: {payload_size}. \
                 mtuDrop: {mtu_drop}. busyDrop: {busy_drop}. noValidChannelDrop: {no_channel_drop}. \
                 snrDrop: {snr_drop}. instanceIDs: {instance_ids:?}. \
                 destinationNodeIDs: {dest_nodes:?}. destinationRadioIDs: {dest_radios:?}. \
                 snrs: {snrs:?}. secondsToTransmits: {toas:?}. plrs: {plrs:?}. pers: {pers:?}",
                self.address
            ),
        )?;

        Ok(sent)
    }

    // ── Receive path ──────────────────────────────────────────────────────

    /// Accept an inbound frame copy from a sending peer. Runs on the
    /// sender's thread; only this device's state is touched.
    pub fn deliver_inbound(&self, frame: Frame) -> Result<bool, SimError> {
        let now = self.owner.upgrade().map(|n| n.timestamp());
        let mut state = self.state.lock();
        if !state.receivable {
            self.logger.log(
                LogLevel::Info,
                now.as_ref(),
                Some(self.class_name()),
                &format!("Frame {} not receiving due to radio not being receivable", frame.id),
            )?;
            return Ok(false);
        }
        // A receiver tuned to a different bandwidth (or spreading factor,
        // for LoRa) never locks on; such frames cannot even collide.
        let compatible = match self.family {
            RadioFamily::Lora => {
                frame.bandwidth_hz == state.phy.bandwidth_hz
                    && frame.spreading_factor == Some(state.phy.sf)
            }
            RadioFamily::Imaging => frame.bandwidth_hz == state.phy.bandwidth_hz,
        };
        if !compatible {
            drop(state);
            self.log_rx(now.as_ref(), frame.id, RxOutcome::CrBwDrop, &[])?;
            return Ok(false);
        }
        if rand::thread_rng().gen_bool(frame.plr.clamp(0.0, 1.0)) {
            drop(state);
            self.log_rx(now.as_ref(), frame.id, RxOutcome::PlrDrop, &[])?;
            return Ok(false);
        }
        state.pending.push(frame);
        Ok(true)
    }

    /// Advance the device to `now`: resolve completed receptions, mark
    /// collisions, apply capture and half-duplex rules, draw packet errors,
    /// and return the payloads that survived.
    pub fn update(&self, now: Time) -> Result<Vec<Vec<u8>>, SimError> {
        let mut delivered = Vec::new();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let own_sf = state.phy.sf;
        let own_coding_rate = state.phy.coding_rate;
        let mut i = 0;
        while i < state.pending.len() {
            if state.pending[i].end_rx > now {
                i += 1;
                continue;
            }
            let mut frame = state.pending.remove(i);

            // Pairwise overlap against everything still pending (including
            // other frames completing this same step).
            for other in state.pending.iter_mut() {
                if !frame.overlaps_rx(other) {
                    continue;
                }
                match self.family {
                    RadioFamily::Imaging => {
                        // Identical windows are the same burst seen through
                        // equal-length paths; anything else collides.
                        if frame.start_rx == other.start_rx && frame.end_rx == other.end_rx {
                            continue;
                        }
                        other.collided_ids.push(frame.id);
                        frame.collided_ids.push(other.id);
                    }
                    RadioFamily::Lora => {
                        let diff = (frame.rssi_dbw - other.rssi_dbw).abs();
                        if diff < CAPTURE_MARGIN_DB {
                            other.collided_ids.push(frame.id);
                            frame.collided_ids.push(other.id);
                            continue;
                        }
                        let sf = frame.spreading_factor.unwrap_or(own_sf);
                        let lock_on = LOCK_ON_SYMBOLS * 2f64.powi(sf as i32) / frame.bandwidth_hz;
                        let frame_stronger = frame.rssi_dbw > other.rssi_dbw;
                        let (stronger_start, weaker_start) = if frame_stronger {
                            (frame.start_rx, other.start_rx)
                        } else {
                            (other.start_rx, frame.start_rx)
                        };
                        if stronger_start < weaker_start {
                            // Capture: the receiver already locked on to the
                            // stronger frame
                            if frame_stronger {
                                other.collided_ids.push(frame.id);
                            } else {
                                frame.collided_ids.push(other.id);
                            }
                        } else if stronger_start.diff_seconds(&weaker_start) > lock_on {
                            // The weaker frame held the receiver past the
                            // lock-on window; both are lost
                            other.collided_ids.push(frame.id);
                            frame.collided_ids.push(other.id);
                        } else if frame_stronger {
                            other.collided_ids.push(frame.id);
                        } else {
                            frame.collided_ids.push(other.id);
                        }
                    }
                }
            }

            if frame.is_collided() {
                self.log_rx(Some(&now), frame.id, RxOutcome::Collision, &frame.collided_ids)?;
                continue;
            }

            // Coding-rate match (the imaging family adapts its rate per
            // frame, so only LoRa checks)
            if self.family == RadioFamily::Lora && frame.coding_rate != own_coding_rate {
                self.log_rx(Some(&now), frame.id, RxOutcome::CrBwDrop, &[])?;
                continue;
            }

            // Half-duplex: reception may not overlap an own transmission
            let half_duplex_conflict = state.transmit_windows.iter().any(|(tx_start, tx_end)| {
                (frame.start_rx <= *tx_start && *tx_start < frame.end_rx)
                    || (frame.start_rx < *tx_end && *tx_end <= frame.end_rx)
            });
            if half_duplex_conflict {
                self.log_rx(Some(&now), frame.id, RxOutcome::TxBusyDrop, &[])?;
                continue;
            }

            if rand::thread_rng().gen_bool(frame.per.clamp(0.0, 1.0)) {
                self.log_rx(Some(&now), frame.id, RxOutcome::PerDrop, &[])?;
                continue;
            }

            self.log_rx(Some(&now), frame.id, RxOutcome::Success, &[])?;
            delivered.push(frame.payload);
        }

        // Garbage-collect transmission windows once the earliest pending
        // reception has moved past them.
        let earliest = state
            .pending
            .iter()
            .map(|f| f.start_rx)
            .min()
            .map(|t| t.max(now))
            .unwrap_or(now);
        state.transmit_windows.retain(|(_, end)| *end > earliest);

        Ok(delivered)
    }

    fn log_rx(
        &self,
        now: Option<&Time>,
        frame_id: u64,
        outcome: RxOutcome,
        collided: &[u64],
    ) -> Result<(), SimError> {
        let success = outcome == RxOutcome::Success;
        let collision = outcome == RxOutcome::Collision;
        self.logger.log(
            LogLevel::Info,
            now,
            Some(self.class_name()),
            &format!(
                "Receiving. frameID: {frame_id}. success: {success}. collision: {collision}. \
                 collisionFrameIDs: {collided:?}. plrDrop: {}. perDrop: {}. txBusyDrop: {}. \
                 crbwDrop: {}",
                outcome == RxOutcome::PlrDrop,
                outcome == RxOutcome::PerDrop,
                outcome == RxOutcome::TxBusyDrop,
                outcome == RxOutcome::CrBwDrop,
            ),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxOutcome {
    Success,
    Collision,
    PlrDrop,
    PerDrop,
    TxBusyDrop,
    CrBwDrop,
}
