//! Monotonic millisecond time.
//!
//! Every timer in the controller is expressed as "do nothing until `now -
//! last >= interval`", so the only thing components need from a clock is a
//! monotonically increasing [`Instant`]. The current time is always passed
//! *into* components by the caller; nothing below the controller reads a
//! clock on its own.
use std::{cell::Cell, fmt, ops::Add, time::Duration};

/// A point in time, measured in milliseconds since the clock started.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Instant(u64);

/// A monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A [`Clock`] backed by [`std::time::Instant`].
#[derive(Copy, Clone, Debug)]
pub struct MonotonicClock {
    start: std::time::Instant,
}

/// A [`Clock`] that only advances when it is told to.
#[derive(Debug, Default)]
pub struct ManualClock(Cell<u64>);

/// Tracks when a periodic action last ran.
#[derive(Copy, Clone, Debug)]
pub struct Interval {
    period: Duration,
    last: Instant,
}

// === impl Instant ===

impl Instant {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the time elapsed since `earlier`, or zero if `earlier` is
    /// actually later than `self`.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// === impl MonotonicClock ===

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        let millis = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Instant(millis)
    }
}

// === impl ManualClock ===

impl ManualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self(Cell::new(0))
    }

    pub fn advance(&self, by: Duration) -> Instant {
        let now = Instant(self.0.get()) + by;
        self.0.set(now.0);
        now
    }

    pub fn set(&self, now: Instant) {
        self.0.set(now.0);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.0.get())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

// === impl Interval ===

impl Interval {
    /// Returns a new interval that first becomes due `period` after boot.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            last: Instant::ZERO,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.period
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn last(&self) -> Instant {
        self.last
    }
}
