// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Injectable clocks.
//!
//! The conductor never reads system time directly; it is handed an epoch
//! clock (milliseconds, wall time) and a nano clock (nanoseconds, monotonic)
//! at construction. Tests drive both from a manually advanced source to make
//! timeout behavior deterministic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub trait EpochClock: Send + Sync {
    fn time_ms(&self) -> i64;
}

/// Monotonic nanoseconds from an arbitrary origin.
pub trait NanoClock: Send + Sync {
    fn time_ns(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(_) => 0,
        }
    }
}

/// System monotonic clock, anchored at first use.
#[derive(Debug, Default)]
pub struct SystemNanoClock;

static MONOTONIC_ORIGIN: OnceLock<Instant> = OnceLock::new();

impl NanoClock for SystemNanoClock {
    fn time_ns(&self) -> i64 {
        let origin = MONOTONIC_ORIGIN.get_or_init(Instant::now);
        origin.elapsed().as_nanos() as i64
    }
}

/// A manually advanced clock serving both roles.
///
/// Holds a single nanosecond counter; the epoch reading is derived from it
/// so the two views advance together, as they do on a real host.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absolute time in nanoseconds.
    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }

    /// Advance the time by `delta_ns` nanoseconds.
    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    /// Advance the time by `delta_ms` milliseconds.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.advance_ns(delta_ms * 1_000_000);
    }
}

impl EpochClock for ManualClock {
    fn time_ms(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst) / 1_000_000
    }
}

impl NanoClock for ManualClock {
    fn time_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_both_views() {
        let clock = ManualClock::new();
        assert_eq!(clock.time_ms(), 0);
        assert_eq!(clock.time_ns(), 0);

        clock.advance_ms(1_500);
        assert_eq!(clock.time_ms(), 1_500);
        assert_eq!(clock.time_ns(), 1_500_000_000);

        clock.set_ns(42);
        assert_eq!(clock.time_ns(), 42);
        assert_eq!(clock.time_ms(), 0);
    }

    #[test]
    fn test_system_nano_clock_is_monotonic() {
        let clock = SystemNanoClock;
        let a = clock.time_ns();
        let b = clock.time_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_system_epoch_clock_is_plausible() {
        let clock = SystemEpochClock;
        // Any date after 2020 in milliseconds.
        assert!(clock.time_ms() > 1_577_836_800_000);
    }
}
