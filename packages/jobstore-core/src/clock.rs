//! Monotonic time source for the storage engine.
//!
//! Provides a strictly non-decreasing timestamp with at least millisecond
//! resolution, immune to wall-clock adjustments (NTP steps, user changing the
//! system clock). Expiration indexes, eviction, and lock timeouts all reason
//! in terms of [`MonotonicTime`] rather than `SystemTime`.

use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A single point on the monotonic timeline.
///
/// Backed by [`std::time::Instant`] internally; arithmetic saturates instead
/// of panicking or overflowing, matching the "fails never" requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime(Instant);

impl MonotonicTime {
    /// Duration elapsed since `earlier`. Saturates to `Duration::ZERO` if
    /// `earlier` is actually later than `self`.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: MonotonicTime) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

impl Add<Duration> for MonotonicTime {
    type Output = MonotonicTime;

    fn add(self, rhs: Duration) -> MonotonicTime {
        MonotonicTime(self.0 + rhs)
    }
}

impl Sub<Duration> for MonotonicTime {
    type Output = MonotonicTime;

    fn sub(self, rhs: Duration) -> MonotonicTime {
        MonotonicTime(self.0.checked_sub(rhs).unwrap_or(self.0))
    }
}

impl Sub<MonotonicTime> for MonotonicTime {
    type Output = Duration;

    fn sub(self, rhs: MonotonicTime) -> Duration {
        self.0.saturating_duration_since(rhs.0)
    }
}

/// Tamper-proof time source used throughout the engine.
///
/// `now()` is guaranteed to return strictly increasing values across
/// successive calls on the same clock, even if the underlying OS counter has
/// coarse resolution -- callers that sample in a tight loop never observe two
/// equal timestamps.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch_instant: Instant,
    epoch_wall: SystemTime,
    /// Nanoseconds since `epoch_instant` of the last value handed out by
    /// `now()`. Shared (via `Arc`) across clones of the same clock so the
    /// strict-monotonicity guarantee holds across clones, not just on one
    /// instance.
    last_nanos: Arc<AtomicU64>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Creates a clock anchored to the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_instant: Instant::now(),
            epoch_wall: SystemTime::now(),
            last_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the current monotonic time.
    ///
    /// Strictly greater than the previous call's result: if the OS clock
    /// hasn't visibly advanced, a single nanosecond is added so ordering
    /// among successive samples is always total, even on platforms with
    /// coarse `Instant` resolution.
    pub fn now(&self) -> MonotonicTime {
        let candidate = u64::try_from(self.epoch_instant.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let mut last = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = if candidate > last { candidate } else { last + 1 };
            match self.last_nanos.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => {
                    let instant = self.epoch_instant.checked_add(Duration::from_nanos(next)).unwrap_or_else(Instant::now);
                    return MonotonicTime(instant);
                }
                Err(observed) => last = observed,
            }
        }
    }

    /// Converts a [`MonotonicTime`] produced by this clock into UTC wall-clock
    /// time, computed as `wall_now + (t - monotonic_now())`.
    #[must_use]
    pub fn to_wall_clock(&self, t: MonotonicTime) -> SystemTime {
        let now = self.now();
        if t >= now {
            let ahead = t - now;
            self.epoch_wall
                .checked_add(now.0.saturating_duration_since(self.epoch_instant) + ahead)
                .unwrap_or(self.epoch_wall)
        } else {
            let behind = now - t;
            let elapsed_at_t = now
                .0
                .saturating_duration_since(self.epoch_instant)
                .checked_sub(behind)
                .unwrap_or(Duration::ZERO);
            self.epoch_wall
                .checked_add(elapsed_at_t)
                .unwrap_or(self.epoch_wall)
        }
    }

    /// Returns the current UTC wall-clock time, as milliseconds since the
    /// Unix epoch. Convenience wrapper used by `get_utc_date_time` and the
    /// statistics timeline bucketing (see `jobstore-engine`).
    #[must_use]
    pub fn utc_now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Test/embedding double for [`MonotonicClock`]: a clock whose value is
/// advanced explicitly rather than tracking the OS clock.
///
/// Mirrors the teacher crate's `FixedClock` test double for `ClockSource`
/// (see `hlc.rs`), generalized to the engine's eviction and lock-timeout
/// tests where wall-clock-speed sleeps would make tests slow and flaky.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Duration,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a manual clock starting at "time zero".
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    /// Returns the current simulated time.
    #[must_use]
    pub fn now(&self) -> MonotonicTime {
        MonotonicTime(self.base + self.offset)
    }

    /// Advances the simulated clock by `d`.
    pub fn advance(&mut self, d: Duration) {
        self.offset += d;
    }
}
