//! UTC simulation time with microsecond resolution.
//!
//! Internally an `i64` count of microseconds since the Unix epoch; chrono is
//! used only at the string boundary (config parsing, log formatting).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const MICROS_PER_SEC: i64 = 1_000_000;

/// A wall-clock instant in UTC.
///
/// Simulation time is an ordered sequence `t0, t0+Δ, t0+2Δ, …` produced with
/// [`Time::add_seconds`]. Values are `Copy`; adding seconds returns a new
/// instant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Time {
    micros: i64,
}

impl Time {
    /// Parse from `YYYY-MM-DD HH:MM:SS` (an optional fractional part is
    /// accepted as well).
    pub fn from_str(s: &str) -> Result<Self, chrono::ParseError> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")?;
        Ok(Self {
            micros: naive.and_utc().timestamp_micros(),
        })
    }

    pub fn from_unix_seconds(secs: f64) -> Self {
        Self {
            micros: (secs * MICROS_PER_SEC as f64).round() as i64,
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn to_unix_seconds(&self) -> f64 {
        self.micros as f64 / MICROS_PER_SEC as f64
    }

    /// A new instant `seconds` later (negative values go backwards).
    #[must_use]
    pub fn add_seconds(&self, seconds: f64) -> Self {
        Self {
            micros: self.micros + (seconds * MICROS_PER_SEC as f64).round() as i64,
        }
    }

    /// `self - earlier` in seconds.
    pub fn diff_seconds(&self, earlier: &Time) -> f64 {
        (self.micros - earlier.micros) as f64 / MICROS_PER_SEC as f64
    }

    fn to_datetime(self) -> DateTime<Utc> {
        let secs = self.micros.div_euclid(MICROS_PER_SEC);
        let nanos = (self.micros.rem_euclid(MICROS_PER_SEC) * 1000) as u32;
        DateTime::<Utc>::from_timestamp(secs, nanos).expect("timestamp within chrono range")
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dt = self.to_datetime();
        if self.micros % MICROS_PER_SEC == 0 {
            write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S"))
        } else {
            write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.6f"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let t = Time::from_str("2022-10-14 12:00:00").unwrap();
        assert_eq!(t.to_string(), "2022-10-14 12:00:00");
    }

    #[test]
    fn sub_second_arithmetic() {
        let t = Time::from_str("2022-10-14 12:00:00").unwrap();
        let later = t.add_seconds(1.5);
        assert_eq!(later.diff_seconds(&t), 1.5);
        assert_eq!(later.to_string(), "2022-10-14 12:00:01.500000");
    }

    #[test]
    fn ordering_is_total() {
        let t0 = Time::from_str("2022-10-14 12:00:00").unwrap();
        let t1 = t0.add_seconds(0.000001);
        assert!(t0 < t1);
        assert_eq!(t1.add_seconds(-0.000001), t0);
    }

    #[test]
    fn step_sequence_accumulates_exactly() {
        let t0 = Time::from_str("2022-10-14 12:00:00").unwrap();
        let mut t = t0;
        for _ in 0..3600 {
            t = t.add_seconds(1.0);
        }
        assert_eq!(t.diff_seconds(&t0), 3600.0);
    }
}
