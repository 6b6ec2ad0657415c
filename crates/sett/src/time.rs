//! Time primitives for block-aligned buffering.

use std::time::Duration;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Granularity tag carried alongside each datapoint.
///
/// The unit does not rescale the stored timestamp (timestamps are always
/// nanosecond instants); it records the resolution the writer intends,
/// which downsampling and display layers use downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// One-second resolution.
    Seconds,
    /// Millisecond resolution.
    Milliseconds,
    /// Microsecond resolution.
    Microseconds,
    /// Nanosecond resolution (default).
    #[default]
    Nanoseconds,
}

impl TimeUnit {
    /// Returns the wire code for this unit.
    pub fn code(self) -> u8 {
        match self {
            TimeUnit::Seconds => 0,
            TimeUnit::Milliseconds => 1,
            TimeUnit::Microseconds => 2,
            TimeUnit::Nanoseconds => 3,
        }
    }

    /// Reconstructs a unit from its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TimeUnit::Seconds),
            1 => Some(TimeUnit::Milliseconds),
            2 => Some(TimeUnit::Microseconds),
            3 => Some(TimeUnit::Nanoseconds),
            _ => None,
        }
    }

    /// Returns the duration of one tick at this resolution.
    pub fn tick(self) -> Duration {
        match self {
            TimeUnit::Seconds => Duration::from_secs(1),
            TimeUnit::Milliseconds => Duration::from_millis(1),
            TimeUnit::Microseconds => Duration::from_micros(1),
            TimeUnit::Nanoseconds => Duration::from_nanos(1),
        }
    }
}

/// Truncates a timestamp down to the start of its block-aligned window.
///
/// Windows are aligned to the Unix epoch. Uses euclidean division so that
/// pre-epoch timestamps truncate toward the window start rather than
/// toward zero.
pub fn truncate_to(timestamp: Timestamp, window_ns: i64) -> Timestamp {
    timestamp.div_euclid(window_ns) * window_ns
}
