//! The logical clock driving `ReplicaState::handle_tick`.
//!
//! The consensus core never reads a wall clock; it only knows "time has
//! advanced by `delta` units" (§3, `LogicalTime`). This module is the one
//! place in the node process that turns wall-clock ticks into that delta,
//! at a fixed interval read from configuration.

use std::time::Duration;

/// Fires every `interval`, always reporting a delta of `1` tick.
///
/// A fixed one-tick-per-fire cadence keeps the mapping between wall-clock
/// time and `LogicalTime` units simple: `request_t`, `whatsup_t`, `call_t`
/// and `bonjour_t` are configured directly in ticks, not milliseconds.
pub struct Clock {
    interval: Duration,
}

impl Clock {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_clamped_to_one_millisecond() {
        let clock = Clock::new(0);
        assert_eq!(clock.interval(), Duration::from_millis(1));
    }

    #[test]
    fn interval_matches_configured_value() {
        let clock = Clock::new(50);
        assert_eq!(clock.interval(), Duration::from_millis(50));
    }
}
