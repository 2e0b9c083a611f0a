//! Monotonic timestamps shared by the pipeline thread and the replay worker.

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use tokio::time::Instant;

/// Point on the layer clock, in microseconds since the clock origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Shifts a timestamp by a signed span of microseconds.
impl Add<i64> for Timestamp {
    type Output = Timestamp;

    fn add(self, micros: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(micros))
    }
}

/// Signed span between two timestamps, in microseconds.
impl Sub for Timestamp {
    type Output = i64;

    fn sub(self, rhs: Timestamp) -> i64 {
        self.0.saturating_sub(rhs.0)
    }
}

/// Monotonic clock anchored on the async runtime's time source.
///
/// Running on `tokio::time::Instant` keeps replay deadlines consistent with
/// `tokio::time::sleep_until`, including when the runtime clock is paused.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current reading of the clock.
    pub fn now(&self) -> Timestamp {
        self.timestamp(Instant::now())
    }

    /// Converts a runtime instant into a clock reading.
    pub fn timestamp(&self, instant: Instant) -> Timestamp {
        let micros = if instant >= self.origin {
            i64::try_from(instant.duration_since(self.origin).as_micros()).unwrap_or(i64::MAX)
        } else {
            let before = self.origin.duration_since(instant).as_micros();
            -i64::try_from(before).unwrap_or(i64::MAX)
        };
        Timestamp(micros)
    }

    /// Runtime instant matching a clock reading. Readings before the origin
    /// clamp to the earliest representable instant.
    pub fn instant(&self, at: Timestamp) -> Instant {
        let magnitude = Duration::from_micros(at.0.unsigned_abs());
        if at.0 >= 0 {
            self.origin + magnitude
        } else {
            self.origin.checked_sub(magnitude).unwrap_or(self.origin)
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
