//! ECEF Cartesian positions with WGS-84 geodetic conversions.

use serde::{Deserialize, Serialize};

// WGS-84 ellipsoid
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// An Earth-centered Earth-fixed position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build from WGS-84 geodetic coordinates. `elev_m` is height above the
    /// reference ellipsoid.
    pub fn from_lat_lon(lat_deg: f64, lon_deg: f64, elev_m: f64) -> Self {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
        let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        Self {
            x: (n + elev_m) * lat.cos() * lon.cos(),
            y: (n + elev_m) * lat.cos() * lon.sin(),
            z: (n * (1.0 - e2) + elev_m) * lat.sin(),
        }
    }

    /// Convert back to WGS-84 `(lat_deg, lon_deg, elev_m)`.
    pub fn to_lat_lon(&self) -> (f64, f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let p = (self.x * self.x + self.y * self.y).sqrt();
        let lon = self.y.atan2(self.x);
        // Bowring-style fixed-point iteration; converges in a handful of
        // rounds for any point above the deep mantle.
        let mut lat = self.z.atan2(p * (1.0 - e2));
        let mut n = WGS84_A;
        for _ in 0..6 {
            n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
            lat = (self.z + e2 * n * lat.sin()).atan2(p);
        }
        let elev = if lat.cos().abs() > 1e-12 {
            p / lat.cos() - n
        } else {
            self.z.abs() - n * (1.0 - e2)
        };
        (lat.to_degrees(), lon.to_degrees(), elev)
    }

    /// Euclidean distance in meters.
    pub fn distance(&self, other: &Location) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// Height above the Earth's center of mass.
    pub fn radius(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Elevation angle of `self` above the local horizon at `ground`, in
    /// degrees. Positive means visible above a flat horizon.
    pub fn altitude_angle_deg(&self, ground: &Location) -> f64 {
        let (dx, dy, dz) = (self.x - ground.x, self.y - ground.y, self.z - ground.z);
        let gr = ground.radius();
        let (gx, gy, gz) = (ground.x / gr, ground.y / gr, ground.z / gr);
        let dr = (dx * dx + dy * dy + dz * dz).sqrt();
        ((dx * gx + dy * gy + dz * gz) / dr).asin().to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lat_lon_round_trip() {
        let loc = Location::from_lat_lon(49.3, -122.2, 120.0);
        let (lat, lon, elev) = loc.to_lat_lon();
        assert!((lat - 49.3).abs() < 1e-6);
        assert!((lon - -122.2).abs() < 1e-6);
        assert!((elev - 120.0).abs() < 1e-3);
    }

    #[test]
    fn equator_reference_point() {
        let loc = Location::from_lat_lon(0.0, 0.0, 0.0);
        assert!((loc.x - WGS84_A).abs() < 1e-6);
        assert!(loc.y.abs() < 1e-6);
        assert!(loc.z.abs() < 1e-6);
    }

    #[test]
    fn distance_between_known_points() {
        let a = Location::new(0.0, 0.0, 0.0);
        let b = Location::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn satellite_directly_overhead_is_at_ninety_degrees() {
        let ground = Location::from_lat_lon(0.0, 0.0, 0.0);
        let sat = Location::new(ground.x + 637_000.0, 0.0, 0.0);
        let angle = sat.altitude_angle_deg(&ground);
        assert!((angle - 90.0).abs() < 1e-6, "got {angle}");
    }

    #[test]
    fn satellite_on_horizon_is_near_zero_degrees() {
        let ground = Location::from_lat_lon(0.0, 0.0, 0.0);
        // Tangential offset: same radius direction, pure sideways displacement
        let sat = Location::new(ground.x, 500_000.0, 0.0);
        let angle = sat.altitude_angle_deg(&ground);
        assert!(angle.abs() < 3.0, "got {angle}");
    }
}
