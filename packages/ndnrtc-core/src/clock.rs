//! Monotonic and wall-clock timestamps.
//!
//! All latency arithmetic in the engine uses the monotonic clock; timestamps
//! that cross the wire (segment headers, meta packets) use wall-clock
//! milliseconds. The monotonic readings are anchored to a process-wide
//! [`Instant`] taken on first use, so they are comparable across tasks.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Monotonic milliseconds since process start.
pub fn millis() -> i64 {
    anchor().elapsed().as_millis() as i64
}

/// Monotonic microseconds since process start.
pub fn micros() -> i64 {
    anchor().elapsed().as_micros() as i64
}

/// Monotonic nanoseconds since process start.
pub fn nanos() -> i64 {
    anchor().elapsed().as_nanos() as i64
}

/// Wall-clock seconds since the Unix epoch, with fractional part.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.)
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn millis_since_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_readings_do_not_go_backwards() {
        let a = micros();
        let b = micros();
        assert!(b >= a, "monotonic clock went backwards: {} -> {}", a, b);
    }

    #[test]
    fn units_are_consistent() {
        let ms = millis();
        let us = micros();
        // micros read after millis, so it must cover at least the same span
        assert!(us >= ms * 1000 - 1000);
    }

    #[test]
    fn epoch_millis_are_plausible() {
        // anything after 2020-01-01 will do
        assert!(millis_since_epoch() > 1_577_836_800_000);
    }
}
