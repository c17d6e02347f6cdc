//! TLE-driven orbital propagation.
//!
//! SGP4 (via the `sgp4` crate) provides the TEME state; a GMST rotation
//! turns it into the Earth-fixed frame the rest of the simulator works in.
//! Sunlight uses a cylindrical Earth-shadow test; because the per-instant
//! test is expensive to run every step, the transition times are found once
//! by coarse scan plus bisection and the per-step query walks that list.
//! Pass finding works the same way on the elevation-angle predicate.

use std::sync::{Arc, Weak};

use serde::Deserialize;

use satnet_types::{Location, Time};

use crate::error::SimError;
use crate::logging::{LogLevel, Logger};
use crate::model::{ApiValue, Model, ModelApi, ModelTag};
use crate::node::Node;

const EARTH_RADIUS_KM: f64 = 6371.0;
/// Days from the Unix epoch to J2000 (2000-01-01 12:00 UTC).
const J2000_UNIX_DAYS: f64 = 10957.5;
/// Coarse sunlight scan: a LEO spends tens of minutes per lighting regime.
const SUNLIGHT_SCAN_S: f64 = 15.0 * 60.0;
/// Coarse pass scan; the shortest usable contact windows are minutes long.
const PASS_SCAN_S: f64 = 30.0;
const PASS_EDGE_S: f64 = 0.5;

#[derive(Debug, Deserialize, Default)]
struct OrbitArgs {
    #[serde(default)]
    always_calculate: bool,
}

pub struct ModelOrbit {
    owner: Weak<Node>,
    logger: Arc<Logger>,
    constants: sgp4::Constants,
    epoch: Time,
    always_calculate: bool,
    /// `(switch time, sunlit after the switch)`, ending in a sentinel past
    /// the simulation end; consumed front-to-front as time advances.
    sunlight_switches: Option<Vec<(Time, bool)>>,
}

impl ModelOrbit {
    fn owner(&self) -> Result<Arc<Node>, SimError> {
        self.owner
            .upgrade()
            .ok_or_else(|| SimError::Dependency("orbit model lost its owner node".into()))
    }

    fn teme_state(&self, t: Time) -> Result<([f64; 3], [f64; 3]), SimError> {
        let minutes = t.diff_seconds(&self.epoch) / 60.0;
        let prediction = self
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| SimError::Orbit(format!("propagation failed at {t}: {e}")))?;
        Ok((prediction.position, prediction.velocity))
    }

    fn gmst_rad(t: Time) -> f64 {
        let d = t.to_unix_seconds() / 86_400.0 - J2000_UNIX_DAYS;
        (280.460_618_37 + 360.985_647_366_29 * d).rem_euclid(360.0).to_radians()
    }

    fn ecef_position(&self, t: Time) -> Result<Location, SimError> {
        let (pos_km, _) = self.teme_state(t)?;
        let theta = Self::gmst_rad(t);
        let (sin_t, cos_t) = theta.sin_cos();
        Ok(Location::new(
            (pos_km[0] * cos_t + pos_km[1] * sin_t) * 1000.0,
            (-pos_km[0] * sin_t + pos_km[1] * cos_t) * 1000.0,
            pos_km[2] * 1000.0,
        ))
    }

    fn ecef_velocity(&self, t: Time) -> Result<[f64; 3], SimError> {
        let (_, vel_km_s) = self.teme_state(t)?;
        let theta = Self::gmst_rad(t);
        let (sin_t, cos_t) = theta.sin_cos();
        Ok([
            (vel_km_s[0] * cos_t + vel_km_s[1] * sin_t) * 1000.0,
            (-vel_km_s[0] * sin_t + vel_km_s[1] * cos_t) * 1000.0,
            vel_km_s[2] * 1000.0,
        ])
    }

    /// Unit vector to the Sun in the equatorial frame (low-precision solar
    /// ephemeris, a fraction of a degree over the simulation horizons here).
    fn sun_unit(t: Time) -> [f64; 3] {
        let n = t.to_unix_seconds() / 86_400.0 - J2000_UNIX_DAYS;
        let l = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
        let g = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
        let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
        let epsilon = (23.439 - 4e-7 * n).to_radians();
        [
            lambda.cos(),
            lambda.sin() * epsilon.cos(),
            lambda.sin() * epsilon.sin(),
        ]
    }

    /// Cylindrical-shadow test in the inertial frame.
    fn sunlit_at(&self, t: Time) -> Result<bool, SimError> {
        let (r_km, _) = self.teme_state(t)?;
        let s = Self::sun_unit(t);
        let along = r_km[0] * s[0] + r_km[1] * s[1] + r_km[2] * s[2];
        if along > 0.0 {
            return Ok(true);
        }
        let perp = [
            r_km[0] - along * s[0],
            r_km[1] - along * s[1],
            r_km[2] - along * s[2],
        ];
        Ok((perp[0] * perp[0] + perp[1] * perp[1] + perp[2] * perp[2]).sqrt() > EARTH_RADIUS_KM)
    }

    fn build_sunlight_switches(&self) -> Result<Vec<(Time, bool)>, SimError> {
        let owner = self.owner()?;
        let start = owner.sim_start();
        let end = owner.sim_end();
        let duration = end.diff_seconds(&start);
        let granularity = SUNLIGHT_SCAN_S.min(duration.max(1.0));
        let target = owner.delta_s().max(0.001);

        let mut samples = Vec::new();
        let mut offset = 0.0;
        while offset < duration {
            samples.push(self.sunlit_at(start.add_seconds(offset))?);
            offset += granularity;
        }
        if samples.is_empty() {
            samples.push(self.sunlit_at(start)?);
        }

        let mut switches = Vec::new();
        for i in 0..samples.len().saturating_sub(1) {
            if samples[i] == samples[i + 1] {
                continue;
            }
            let mut lo = start.add_seconds(i as f64 * granularity);
            let mut hi = lo.add_seconds(granularity);
            while hi.diff_seconds(&lo) > target {
                let mid = lo.add_seconds(hi.diff_seconds(&lo) / 2.0);
                if self.sunlit_at(mid)? == samples[i] {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            switches.push((hi, samples[i + 1]));
        }
        // Sentinel past the horizon so the last regime is also covered
        let last = *samples.last().expect("at least one sample");
        switches.push((end.add_seconds(granularity), !last));
        Ok(switches)
    }

    fn in_sunlight(&mut self) -> Result<bool, SimError> {
        if self.sunlight_switches.is_none() {
            self.sunlight_switches = Some(self.build_sunlight_switches()?);
        }
        let now = self.owner()?.timestamp();
        let switches = self.sunlight_switches.as_mut().expect("just built");
        let mut sunlit = false;
        let mut matched = None;
        for (idx, (switch_time, sunlit_after)) in switches.iter().enumerate() {
            if *switch_time >= now {
                // Before a switch the regime is the opposite of what follows
                sunlit = !*sunlit_after;
                matched = Some(idx);
                break;
            }
        }
        // Consumed switches never get queried again; drop them
        if let Some(idx) = matched {
            if idx > 0 {
                switches.drain(..idx);
            }
        }
        Ok(sunlit)
    }

    fn find_passes(
        &self,
        ground: &Arc<Node>,
        start: Time,
        end: Time,
        min_elevation_deg: f64,
    ) -> Result<Vec<(Time, Time)>, SimError> {
        let ground_pos = ground.get_position(Some(start))?;
        let visible = |t: Time| -> Result<bool, SimError> {
            Ok(self
                .ecef_position(t)?
                .altitude_angle_deg(&ground_pos)
                >= min_elevation_deg)
        };

        let mut passes: Vec<(Time, Time)> = Vec::new();
        let mut prev_t = start;
        let mut prev_vis = visible(start)?;
        let mut pass_start = prev_vis.then_some(start);

        let mut t = start.add_seconds(PASS_SCAN_S).min(end);
        loop {
            let vis = visible(t)?;
            if vis != prev_vis {
                // Bisect the rise/set edge down to sub-second accuracy
                let (mut lo, mut hi) = (prev_t, t);
                while hi.diff_seconds(&lo) > PASS_EDGE_S {
                    let mid = lo.add_seconds(hi.diff_seconds(&lo) / 2.0);
                    if visible(mid)? == prev_vis {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                if vis {
                    pass_start = Some(hi);
                } else if let Some(rise) = pass_start.take() {
                    passes.push((rise, hi));
                }
                prev_vis = vis;
            }
            prev_t = t;
            if t >= end {
                break;
            }
            t = t.add_seconds(PASS_SCAN_S).min(end);
        }
        if let Some(rise) = pass_start.take() {
            // Still above the horizon at the end of the search window
            passes.push((rise, end));
        }
        self.logger.log(
            LogLevel::Debug,
            Some(&start),
            Some(self.name()),
            &format!(
                "Found {} passes over node {} between {start} and {end}",
                passes.len(),
                ground.node_id()
            ),
        )?;
        Ok(passes)
    }
}

impl Model for ModelOrbit {
    fn name(&self) -> &'static str {
        "ModelOrbit"
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn supported_node_classes(&self) -> &'static [&'static str] {
        &["SatelliteBasic"]
    }

    fn dispatch(&mut self, api: ModelApi) -> Result<ApiValue, SimError> {
        match api {
            ModelApi::InSunlight => Ok(ApiValue::Bool(self.in_sunlight()?)),
            ModelApi::GetPosition { time } => {
                let loc = self.ecef_position(time)?;
                self.owner()?.update_position(loc, time);
                Ok(ApiValue::Position(loc))
            }
            ModelApi::GetVelocity { time } => Ok(ApiValue::Velocity(self.ecef_velocity(time)?)),
            ModelApi::GetPasses {
                ground,
                start,
                end,
                min_elevation_deg,
            } => Ok(ApiValue::Passes(self.find_passes(
                &ground,
                start,
                end,
                min_elevation_deg,
            )?)),
            other => Err(SimError::UnsupportedApi {
                model: self.name(),
                api: other.name(),
            }),
        }
    }

    fn execute(&mut self) -> Result<(), SimError> {
        if self.always_calculate {
            let owner = self.owner()?;
            let now = owner.timestamp();
            let loc = self.ecef_position(now)?;
            owner.update_position(loc, now);
        }
        Ok(())
    }
}

pub fn init(
    node: &Arc<Node>,
    logger: Arc<Logger>,
    args: &serde_json::Value,
) -> Result<Box<dyn Model>, SimError> {
    let args: OrbitArgs = serde_json::from_value(args.clone()).unwrap_or_default();
    let tle = node
        .tle()
        .ok_or_else(|| SimError::Config(format!("node {} carries no TLE", node.node_id())))?;
    let elements = sgp4::Elements::from_tle(None, tle[0].as_bytes(), tle[1].as_bytes())
        .map_err(|e| SimError::Orbit(format!("bad TLE for node {}: {e}", node.node_id())))?;
    let epoch = Time::from_micros(elements.datetime.and_utc().timestamp_micros());
    let constants = sgp4::Constants::from_elements(&elements)
        .map_err(|e| SimError::Orbit(format!("SGP4 init failed for node {}: {e}", node.node_id())))?;
    Ok(Box::new(ModelOrbit {
        owner: Arc::downgrade(node),
        logger,
        constants,
        epoch,
        always_calculate: args.always_calculate,
        sunlight_switches: None,
    }))
}
