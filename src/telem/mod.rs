//! Telemetry value model: timestamps, rates, typed sample columns, and the
//! frames that carry them to and from the cluster.
//!
//! All time arithmetic stays in integer nanoseconds so that interpolated
//! index series are exact and strictly non-decreasing.

mod frame;
mod series;

pub use frame::Frame;
pub use series::{DataType, Series};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A UTC wall-clock instant in nanoseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(pub i64);

impl TimeStamp {
    pub fn now() -> Self {
        let now = Utc::now();
        match now.timestamp_nanos_opt() {
            Some(ns) => TimeStamp(ns),
            // Out of i64 nanosecond range (year 2262+); fall back to
            // microsecond precision rather than panicking.
            None => TimeStamp(now.timestamp_micros().saturating_mul(1_000)),
        }
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }
}

impl Add<TimeSpan> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: TimeSpan) -> TimeStamp {
        TimeStamp(self.0 + rhs.0)
    }
}

impl Sub for TimeStamp {
    type Output = TimeSpan;

    fn sub(self, rhs: TimeStamp) -> TimeSpan {
        TimeSpan(self.0 - rhs.0)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A signed duration in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSpan(pub i64);

impl TimeSpan {
    pub const NANOSECOND: TimeSpan = TimeSpan(1);
    pub const MICROSECOND: TimeSpan = TimeSpan(1_000);
    pub const MILLISECOND: TimeSpan = TimeSpan(1_000_000);
    pub const SECOND: TimeSpan = TimeSpan(1_000_000_000);

    pub const fn from_secs(secs: i64) -> Self {
        TimeSpan(secs * Self::SECOND.0)
    }

    pub const fn from_millis(millis: i64) -> Self {
        TimeSpan(millis * Self::MILLISECOND.0)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Converts to a `std::time::Duration`, clamping negative spans to zero.
    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0.max(0) as u64)
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A frequency in Hz.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(pub f64);

impl Rate {
    /// The period of one cycle at this rate. A non-positive rate yields a
    /// zero period.
    pub fn period(self) -> TimeSpan {
        if self.0 <= 0.0 {
            return TimeSpan(0);
        }
        TimeSpan((1e9 / self.0) as i64)
    }
}
