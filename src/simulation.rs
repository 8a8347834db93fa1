//! Simulated clock.
//!
//! Maps real instants onto a fake timeline that starts at `fake_start`, runs
//! `drift_ppm` parts-per-million fast (or slow), and optionally accumulates one
//! leap second per simulated day. The leap model is intentionally coarse: the
//! shift grows by one second for every whole day elapsed since the UTC
//! midnight of `fake_start`, it does not follow the real leap-second calendar.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Leap Indicator: last minute of the day has 61 seconds
const LI_INSERT: u8 = 0x40;

/// Leap Indicator: last minute of the day has 59 seconds
const LI_DELETE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeapMode {
    #[default]
    None,
    /// Positive leap second, the simulated clock falls one second behind per day.
    Insert,
    /// Negative leap second, the simulated clock gains one second per day.
    Delete,
}

impl LeapMode {
    /// Leap Indicator bits for byte 0 of an NTP header.
    pub fn indicator_bits(&self) -> u8 {
        match self {
            LeapMode::None => 0,
            LeapMode::Insert => LI_INSERT,
            LeapMode::Delete => LI_DELETE,
        }
    }
}

impl fmt::Display for LeapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeapMode::None => "none",
            LeapMode::Insert => "insert",
            LeapMode::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Immutable simulation parameters, fixed for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Simulation {
    /// Real instant the server started.
    pub true_start: DateTime<Utc>,
    /// Simulated instant that corresponds to `true_start`.
    pub fake_start: DateTime<Utc>,
    pub drift_ppm: f64,
    pub leap: LeapMode,
}

impl Simulation {
    pub fn new(
        true_start: DateTime<Utc>,
        fake_start: DateTime<Utc>,
        drift_ppm: f64,
        leap: LeapMode,
    ) -> Self {
        Simulation {
            true_start,
            fake_start,
            drift_ppm,
            leap,
        }
    }

    /// The no-op simulation: fake time equals real time.
    pub fn identity(start: DateTime<Utc>) -> Self {
        Simulation::new(start, start, 0.0, LeapMode::None)
    }

    /// Unix seconds of the UTC midnight that starts `fake_start`'s day.
    fn fake_midnight(&self) -> i64 {
        self.fake_start.timestamp().div_euclid(SECS_PER_DAY) * SECS_PER_DAY
    }

    /// Map a real instant to the simulated clock.
    pub fn transform(&self, real: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = real - self.true_start;
        let elapsed_ns = elapsed.num_nanoseconds().unwrap_or(i64::MAX) as f64;
        let drift = TimeDelta::nanoseconds((elapsed_ns * self.drift_ppm / 1e6) as i64);
        let simulated = self.fake_start + elapsed + drift;

        if self.leap == LeapMode::None {
            return simulated;
        }

        let mut unix = simulated.timestamp();
        let days = (unix - self.fake_midnight()).div_euclid(SECS_PER_DAY);
        match self.leap {
            LeapMode::Insert => unix -= days,
            LeapMode::Delete => unix += days,
            LeapMode::None => {}
        }

        DateTime::from_timestamp(unix, simulated.timestamp_subsec_nanos()).unwrap_or(simulated)
    }
}

impl fmt::Display for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fake start {} (real {}), drift {:+.3} ppm, leap {}",
            self.fake_start.to_rfc3339(),
            self.true_start.to_rfc3339(),
            self.drift_ppm,
            self.leap
        )
    }
}
