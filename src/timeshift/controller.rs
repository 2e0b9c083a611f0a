//! Pause and rate bookkeeping used to compute replay deadlines.

use crate::clock::Timestamp;

/// Nominal rate. Larger values stretch playback (2000 plays at half speed).
pub const RATE_DEFAULT: i32 = 1000;

/// Deadline computed for one buffered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// When the command must be executed.
    pub at: Timestamp,
    /// Total shift applied to the command date, in microseconds.
    pub offset: i64,
}

impl Deadline {
    /// The replay would have to run ahead of the recording: playback cannot
    /// go fast enough to catch up.
    pub fn is_underflow(&self) -> bool {
        self.offset < 0
    }
}

/// Shift needed so that a command recorded `duration` microseconds after the
/// rate change is paced at `rate` instead of `source_rate`.
///
/// Truncates toward zero.
pub fn rate_delay(duration: i64, rate: i32, source_rate: i32) -> i64 {
    if source_rate == 0 {
        return 0;
    }
    let scaled = i128::from(duration) * i128::from(rate) / i128::from(source_rate);
    let scaled = i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX });
    scaled.saturating_sub(duration)
}

/// Accumulated pause time and rate drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateController {
    paused: bool,
    pause_date: Option<Timestamp>,
    rate: i32,
    rate_source: i32,
    /// Date of the first command replayed since the last rate change.
    rate_date: Option<Timestamp>,
    rate_delay: i64,
    command_delay: i64,
}

impl RateController {
    pub fn new(rate: i32) -> Self {
        Self {
            paused: false,
            pause_date: None,
            rate,
            rate_source: rate,
            rate_date: None,
            rate_delay: 0,
            command_delay: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn rate(&self) -> i32 {
        self.rate
    }

    pub fn source_rate(&self) -> i32 {
        self.rate_source
    }

    /// Sum of every pause duration plus rate drift folded in by rate changes.
    pub fn command_delay(&self) -> i64 {
        self.command_delay
    }

    pub fn rate_delay(&self) -> i64 {
        self.rate_delay
    }

    /// Records an accepted pause state change.
    ///
    /// Resuming adds the time spent paused to the command delay; it needs the
    /// date of the previous pause and returns `false` when there is none.
    pub fn set_paused(&mut self, paused: bool, date: Timestamp) -> bool {
        let mut accounted = true;
        if !paused {
            match self.pause_date {
                Some(start) if self.paused => self.command_delay += date - start,
                _ => accounted = false,
            }
        }
        self.paused = paused;
        self.pause_date = Some(date);
        accounted
    }

    /// Switches to a new rate. The drift accumulated so far is kept in the
    /// command delay and measuring restarts from the next replayed command.
    pub fn set_rate(&mut self, source_rate: i32, rate: i32) {
        self.command_delay += self.rate_delay;
        self.rate_date = None;
        self.rate_delay = 0;
        self.rate = rate;
        self.rate_source = source_rate;
    }

    /// Computes the deadline of the next command to replay.
    pub fn deadline(&mut self, date: Timestamp) -> Deadline {
        let rate_date = *self.rate_date.get_or_insert(date);

        self.rate_delay = 0;
        if self.rate_source != self.rate {
            self.rate_delay = rate_delay(date - rate_date, self.rate, self.rate_source);
        }

        let offset = self.command_delay + self.rate_delay;
        Deadline {
            at: date + offset,
            offset,
        }
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(RATE_DEFAULT)
    }
}
