//! Per-pair link math: free-space loss, SNR, time-on-air, loss rates.
//!
//! Two radio families share the machinery and differ only in their physics
//! tables:
//! - LoRa-style: SX127x time-on-air, per-SF sensitivity floor and SNR→PDR
//!   fits (Elshabrawy & Robert 2018 for BER; Tong et al., MobiCom 2021 for
//!   PDR; Sensors 18(3):772 for the sensitivity floor).
//! - Imaging-style: DVB-S2 adaptive MCS table (ETSI EN 302 307), highest
//!   MODCOD whose SNR threshold the link clears.

use serde::Deserialize;

use crate::error::SimError;

pub const SPEED_OF_LIGHT: f64 = 3e8;
const BOLTZMANN_DB: f64 = -228.6;

/// Which physics table and channel-topology rule a radio uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioFamily {
    /// Broadcast channel, capture effect, SX127x modulation
    Lora,
    /// Point-to-point channels, no capture, DVB-S2 adaptive coding
    Imaging,
}

// ── Phy setup ─────────────────────────────────────────────────────────────────

/// Physical-layer parameters of one radio, as written in the configuration.
/// Powers are dBW, gains dBi, losses dB.
#[derive(Debug, Clone, Deserialize)]
pub struct PhySetup {
    #[serde(rename = "_frequency")]
    pub frequency_hz: f64,
    #[serde(rename = "_bandwidth")]
    pub bandwidth_hz: f64,
    #[serde(rename = "_sf", default)]
    pub sf: u8,
    #[serde(rename = "_coding_rate", default)]
    pub coding_rate: u8,
    #[serde(rename = "_preamble", default = "default_preamble")]
    pub preamble_symbols: u32,
    #[serde(rename = "_tx_power")]
    pub tx_power_dbw: f64,
    #[serde(rename = "_tx_antenna_gain")]
    pub tx_antenna_gain_db: f64,
    #[serde(rename = "_tx_line_loss")]
    pub tx_line_loss_db: f64,
    #[serde(rename = "_rx_antenna_gain")]
    pub rx_antenna_gain_db: f64,
    #[serde(rename = "_rx_line_loss")]
    pub rx_line_loss_db: f64,
    #[serde(rename = "_gain_to_temperature")]
    pub gain_to_temperature_db_k: f64,
    #[serde(rename = "_bits_allowed", default)]
    pub bits_allowed: u32,
    #[serde(rename = "_atmosphere_loss", default)]
    pub atmosphere_loss_db: Option<f64>,
    /// Imaging family only
    #[serde(rename = "_symbol_rate", default)]
    pub symbol_rate_hz: f64,
    #[serde(rename = "_num_channels", default = "default_num_channels")]
    pub num_channels: u32,
}

fn default_preamble() -> u32 {
    8
}

fn default_num_channels() -> u32 {
    1
}

// ── Canonical LoRa tables ─────────────────────────────────────────────────────

/// SNR (dB) → BER steps per spreading factor, first row whose threshold the
/// link SNR exceeds wins; below every row the BER is 1.
const SF_SNR_TO_BER: [(u8, &[(f64, f64)]); 6] = [
    (7, &[
        (-6.5, 1e-5),
        (-7.0, 8e-5),
        (-8.0, 8e-4),
        (-10.0, 1.1e-2),
        (-12.0, 0.1),
        (-14.0, 0.2),
        (-16.0, 0.3),
        (-18.0, 0.4),
        (-24.0, 0.5),
    ]),
    (8, &[
        (-8.0, 8e-6),
        (-9.0, 2e-5),
        (-10.0, 1.1e-4),
        (-12.0, 8e-3),
        (-14.0, 7e-2),
        (-16.0, 0.1),
        (-18.0, 0.3),
        (-24.0, 0.5),
    ]),
    (9, &[
        (-12.0, 1e-5),
        (-13.0, 1.1e-4),
        (-14.0, 1.1e-3),
        (-15.0, 1e-2),
        (-16.0, 3e-2),
        (-18.0, 0.1),
        (-20.0, 0.3),
        (-22.0, 0.4),
        (-24.0, 0.5),
    ]),
    (10, &[
        (-15.0, 1e-4),
        (-16.0, 1.1e-4),
        (-17.0, 1.3e-3),
        (-18.0, 1e-2),
        (-20.0, 0.1),
        (-22.0, 0.2),
        (-24.0, 0.3),
    ]),
    (11, &[
        (-18.0, 1.2e-5),
        (-19.0, 1.4e-4),
        (-20.0, 1.4e-3),
        (-21.0, 1.1e-2),
        (-22.0, 8e-2),
        (-24.0, 0.1),
    ]),
    (12, &[
        (-21.0, 1.4e-5),
        (-22.0, 9e-4),
        (-24.0, 1.2e-2),
    ]),
];

/// Minimum detectable signal per spreading factor, dBm.
const SF_MDS_DBM: [(u8, f64); 6] = [
    (7, -123.0),
    (8, -126.0),
    (9, -129.0),
    (10, -132.0),
    (11, -133.0),
    (12, -136.0),
];

/// SNR→PDR fitted curves: `(sf, lower, upper, coefficients)`; PDR is 0 below
/// `lower`, 1 above `upper`, else the polynomial (highest power first).
/// The SF10 fit carries one fewer coefficient than the others.
const SF_SNR_PDR: [(u8, f64, f64, &[f64]); 6] = [
    (12, -25.0, -21.0, &[-5e-10, 9e-8, -6e-6, 0.0001, 0.0003, -0.0094, 0.02]),
    (11, -23.2, -20.45, &[-6e-10, 1e-7, -1e-5, 0.0004, -0.0054, 0.0259, -0.0271]),
    (10, -21.98, -19.32, &[-5e-11, 4e-8, -5e-6, 0.0002, 0.004, -0.0104]),
    (9, -19.8, -16.75, &[-1e-10, 5e-8, -6e-6, 0.0003, 0.0047, 0.0286, -0.0428]),
    (8, -18.02, -15.32, &[3e-10, -6e-8, 3e-6, -5e-5, 0.0002, 0.0063, -0.0156]),
    (7, -16.96, -13.4, &[-2e-11, 4e-9, -7e-7, 6e-5, 0.0015, 0.0119, -0.0216]),
];

// ── DVB-S2 MODCOD table ───────────────────────────────────────────────────────

/// `(min SNR dB, spectral efficiency, code rate)`; monotonically increasing,
/// the highest row whose threshold the link SNR clears is selected.
const DVBS2_SNR_TO_EFFICIENCY: [(f64, f64, f64); 20] = [
    (-2.35, 0.490243, 1.0 / 4.0),
    (-1.24, 0.56448, 1.0 / 3.0),
    (-0.30, 0.789412, 2.0 / 5.0),
    (1.00, 0.988858, 1.0 / 2.0),
    (2.23, 1.188304, 3.0 / 5.0),
    (3.10, 1.322253, 2.0 / 3.0),
    (4.03, 1.487473, 3.0 / 4.0),
    (4.68, 1.587196, 4.0 / 5.0),
    (5.18, 1.654663, 5.0 / 6.0),
    (6.20, 1.766451, 8.0 / 9.0),
    (6.42, 1.788612, 9.0 / 10.0),
    (6.62, 1.980636, 2.0 / 3.0),
    (7.91, 2.228124, 3.0 / 4.0),
    (9.35, 2.478562, 5.0 / 6.0),
    (10.21, 2.966728, 3.0 / 4.0),
    (11.03, 3.165623, 4.0 / 5.0),
    (11.61, 3.300184, 5.0 / 6.0),
    (12.73, 3.703295, 3.0 / 4.0),
    (13.64, 3.951571, 4.0 / 5.0),
    (14.28, 4.119540, 5.0 / 6.0),
];

/// The imaging waveform frames exactly this many bits; other sizes pass
/// error-free through the PER model.
const IMAGING_FRAME_BITS: u32 = 64_800;
const IMAGING_PER: f64 = 1e-7;

fn ber_for(sf: u8, snr_db: f64) -> Result<f64, SimError> {
    let rows = SF_SNR_TO_BER
        .iter()
        .find(|(s, _)| *s == sf)
        .map(|(_, rows)| *rows)
        .ok_or_else(|| SimError::Config(format!("spreading factor {sf} not supported")))?;
    for (threshold, ber) in rows {
        if snr_db > *threshold {
            return Ok(*ber);
        }
    }
    Ok(1.0)
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// An ordered (sender, receiver) pair at a given distance; computes every
/// per-transmission quantity the device machine records on a frame.
pub struct Link {
    tx: PhySetup,
    rx: PhySetup,
    distance_m: f64,
    family: RadioFamily,
}

impl Link {
    pub fn new(tx: PhySetup, rx: PhySetup, distance_m: f64, family: RadioFamily) -> Self {
        Self { tx, rx, distance_m, family }
    }

    /// Free-space propagation loss in dB.
    pub fn fspl_db(&self) -> f64 {
        let d_km = self.distance_m / 1000.0;
        let f_ghz = self.tx.frequency_hz / 1e9;
        20.0 * d_km.log10() + 20.0 * f_ghz.log10() + 92.45
    }

    fn eirp_dbw(&self) -> f64 {
        self.tx.tx_power_dbw + self.tx.tx_antenna_gain_db - self.tx.tx_line_loss_db
    }

    /// Received signal strength at the destination, dBW.
    pub fn rssi_dbw(&self) -> f64 {
        let rx_chain = self.rx.rx_antenna_gain_db - self.rx.rx_line_loss_db;
        match self.family {
            // Pointing, polarization, atmospheric, cloud and fog losses
            RadioFamily::Lora => self.eirp_dbw() - self.fspl_db() - 6.0 + rx_chain,
            RadioFamily::Imaging => self.eirp_dbw() - self.fspl_db() + rx_chain,
        }
    }

    /// Signal-to-noise ratio at the receiver, dB.
    pub fn snr_db(&self) -> f64 {
        let atmosphere = self.tx.atmosphere_loss_db.unwrap_or(match self.family {
            RadioFamily::Lora => 1.8,
            RadioFamily::Imaging => 6.0,
        });
        self.eirp_dbw() - self.fspl_db() - atmosphere + self.rx.gain_to_temperature_db_k
            - BOLTZMANN_DB
            - 10.0 * self.rx.bandwidth_hz.log10()
    }

    pub fn propagation_delay_s(&self) -> f64 {
        self.distance_m / SPEED_OF_LIGHT
    }

    /// Bit error rate for the current SNR.
    pub fn ber(&self) -> Result<f64, SimError> {
        match self.family {
            RadioFamily::Lora => ber_for(self.tx.sf, self.snr_db()),
            // PER is tabulated directly for the imaging waveform
            RadioFamily::Imaging => Ok(0.0),
        }
    }

    /// Symbol-level packet loss rate, 0..1.
    pub fn plr(&self) -> f64 {
        match self.family {
            RadioFamily::Lora => self.lora_plr(),
            RadioFamily::Imaging => 0.0,
        }
    }

    fn lora_plr(&self) -> f64 {
        let rssi_dbm = self.rssi_dbw() + 30.0;
        let mds = SF_MDS_DBM
            .iter()
            .find(|(s, _)| *s == self.tx.sf)
            .map(|(_, v)| *v)
            .unwrap_or(f64::NEG_INFINITY);
        if rssi_dbm <= mds {
            return 1.0;
        }
        let Some((_, lower, upper, coeffs)) =
            SF_SNR_PDR.iter().find(|(s, ..)| *s == self.tx.sf)
        else {
            return 1.0;
        };
        let snr = self.snr_db();
        if snr < *lower {
            1.0
        } else if snr > *upper {
            0.0
        } else {
            let mut pdr = 0.0;
            let mut power = coeffs.len() as i32 - 1;
            for c in *coeffs {
                pdr += c * snr.powi(power);
                power -= 1;
            }
            1.0 - pdr.clamp(0.0, 1.0)
        }
    }

    /// Packet error rate from the binomial tail
    /// `P(> k errors in N bits) = 1 − Σ_{i=0..k} C(N,i) p^i (1−p)^(N−i)`.
    pub fn per(&self, bits_allowed: u32, frame_bytes: u32) -> Result<f64, SimError> {
        let bits = frame_bytes * 8;
        if self.family == RadioFamily::Imaging {
            return Ok(if bits == IMAGING_FRAME_BITS { IMAGING_PER } else { 0.0 });
        }
        let p = self.ber()?;
        if !(0.0..=1.0).contains(&p) {
            return Err(SimError::Api(format!("BER {p} outside [0, 1]")));
        }
        if bits_allowed > bits {
            return Err(SimError::Api(format!(
                "bits_allowed {bits_allowed} exceeds frame size {bits} bits"
            )));
        }
        if p <= 0.0 {
            return Ok(0.0);
        }
        if p >= 1.0 {
            return Ok(if bits_allowed >= bits { 0.0 } else { 1.0 });
        }
        let (n, q) = (bits as f64, 1.0 - p);
        let mut term = q.powf(n);
        let mut cumulative = term;
        for i in 1..=bits_allowed {
            term *= (n - i as f64 + 1.0) / i as f64 * (p / q);
            cumulative += term;
        }
        Ok((1.0 - cumulative).clamp(0.0, 1.0))
    }

    /// Time to put `frame_bytes` on the air, in seconds.
    ///
    /// Errors only for the imaging family when the SNR clears no MODCOD row.
    pub fn time_on_air_s(&self, frame_bytes: u32) -> Result<f64, SimError> {
        match self.family {
            RadioFamily::Lora => Ok(self.lora_time_on_air_s(frame_bytes)),
            RadioFamily::Imaging => self.imaging_time_on_air_s(frame_bytes),
        }
    }

    fn lora_time_on_air_s(&self, frame_bytes: u32) -> f64 {
        let sf = self.tx.sf as f64;
        let symbol_time = 2f64.powf(sf) / self.tx.bandwidth_hz;
        let low_sf = self.tx.sf <= 6;
        let preamble_time =
            (self.tx.preamble_symbols as f64 + 4.25 + if low_sf { 2.0 } else { 0.0 }) * symbol_time;
        let numerator = 8.0 * frame_bytes as f64 + 16.0 + 20.0 - 4.0 * sf + 8.0
            - if low_sf { 8.0 } else { 0.0 };
        let data_symbols = (numerator / (4.0 * sf)).ceil() * self.tx.coding_rate as f64;
        let header_time = 8.0 * symbol_time;
        preamble_time + header_time + data_symbols * symbol_time
    }

    fn imaging_time_on_air_s(&self, frame_bytes: u32) -> Result<f64, SimError> {
        let snr = self.snr_db();
        let mut selected: Option<(f64, f64)> = None;
        for (threshold, efficiency, code_rate) in DVBS2_SNR_TO_EFFICIENCY {
            if snr >= threshold {
                selected = Some((efficiency, code_rate));
            } else {
                break;
            }
        }
        let (efficiency, code_rate) = selected.ok_or_else(|| {
            SimError::Orbit(format!(
                "SNR {snr:.2} dB below every MODCOD at distance {:.0} m",
                self.distance_m
            ))
        })?;
        let datarate_bps =
            self.tx.symbol_rate_hz * efficiency * code_rate * self.tx.num_channels as f64;
        Ok(frame_bytes as f64 * 8.0 / datarate_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lora_phy(tx_power_dbw: f64, frequency_hz: f64) -> PhySetup {
        PhySetup {
            frequency_hz,
            bandwidth_hz: 30e3,
            sf: 11,
            coding_rate: 5,
            preamble_symbols: 8,
            tx_power_dbw,
            tx_antenna_gain_db: 2.18,
            tx_line_loss_db: 1.0,
            rx_antenna_gain_db: -2.18,
            rx_line_loss_db: 1.0,
            gain_to_temperature_db_k: -30.1,
            bits_allowed: 2,
            atmosphere_loss_db: None,
            symbol_rate_hz: 0.0,
            num_channels: 1,
        }
    }

    #[test]
    fn fspl_for_overhead_leo_pass() {
        let link = Link::new(lora_phy(1.76, 0.138e9), lora_phy(1.76, 0.138e9), 637_000.0, RadioFamily::Lora);
        assert!((link.fspl_db() - 131.33).abs() < 1.0, "got {}", link.fspl_db());
    }

    #[test]
    fn rssi_matches_link_budget() {
        let link = Link::new(lora_phy(1.76, 0.138e9), lora_phy(1.76, 0.138e9), 637_000.0, RadioFamily::Lora);
        assert!((link.rssi_dbw() - -138.25).abs() < 1.0, "got {}", link.rssi_dbw());
    }

    #[test]
    fn lora_time_on_air_sf11() {
        let link = Link::new(lora_phy(1.76, 0.138e9), lora_phy(1.76, 0.138e9), 637_000.0, RadioFamily::Lora);
        // 20-byte frame at SF11/BW30k/CR5: (12.25 + 8 + 20) symbols of 68.27 ms
        let toa = link.time_on_air_s(20).unwrap();
        assert!((toa - 2.7477).abs() < 0.01, "got {toa}");
    }

    #[test]
    fn per_is_binomial_tail() {
        let link = Link::new(lora_phy(22.0, 0.138e9), lora_phy(22.0, 0.138e9), 100_000.0, RadioFamily::Lora);
        // Strong link: BER 1.2e-5 at SF11, 2 bit errors allowed in 160 bits
        let per = link.per(2, 20).unwrap();
        assert!(per < 1e-6, "got {per}");
        // Degenerate: every bit may be wrong
        let per_all = link.per(160, 20).unwrap();
        assert!(per_all.abs() < 1e-12);
    }

    #[test]
    fn strong_short_link_has_zero_plr() {
        let link = Link::new(lora_phy(22.0, 0.138e9), lora_phy(22.0, 0.138e9), 100_000.0, RadioFamily::Lora);
        assert_eq!(link.plr(), 0.0);
    }

    #[test]
    fn below_sensitivity_floor_loses_every_packet() {
        // 1 W transmitter over a 40 000 km geostationary-scale path
        let link = Link::new(lora_phy(0.0, 0.138e9), lora_phy(0.0, 0.138e9), 4e7, RadioFamily::Lora);
        assert_eq!(link.plr(), 1.0);
    }

    #[test]
    fn dvbs2_rate_adapts_to_snr() {
        let mut phy = lora_phy(10.0, 8.0e9);
        phy.symbol_rate_hz = 10e6;
        phy.num_channels = 1;
        phy.gain_to_temperature_db_k = 10.0;
        phy.bandwidth_hz = 10e6;
        let near = Link::new(phy.clone(), phy.clone(), 600_000.0, RadioFamily::Imaging);
        let far = Link::new(phy.clone(), phy, 1_500_000.0, RadioFamily::Imaging);
        let toa_near = near.time_on_air_s(8100).unwrap();
        let toa_far = far.time_on_air_s(8100).unwrap();
        assert!(toa_near < toa_far, "higher SNR must pick a faster MODCOD");
    }
}
