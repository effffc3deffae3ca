//! Tick conversion for persisted durations.
//!
//! Periods are stored as 100-nanosecond ticks so that rows written by other
//! farm members stay readable regardless of the host language.

use std::time::Duration;

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

const NANOS_PER_TICK: u128 = 100;

/// Convert a duration to ticks, saturating at `i64::MAX`.
pub fn duration_to_ticks(duration: Duration) -> i64 {
    let ticks = duration.as_nanos() / NANOS_PER_TICK;
    i64::try_from(ticks).unwrap_or(i64::MAX)
}

/// Convert ticks back to a duration. Negative values map to zero.
pub fn ticks_to_duration(ticks: i64) -> Duration {
    if ticks <= 0 {
        return Duration::ZERO;
    }

    let secs = (ticks / TICKS_PER_SECOND) as u64;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as u32;
    Duration::new(secs, nanos)
}
