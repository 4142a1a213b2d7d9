use crate::clock::Instant;
use std::{fmt, time::Duration};

/// Counts consecutive failures against a fixed maximum.
///
/// The counter is reset by any success and bumped by exactly one on each
/// failure. [`RetryBudget::record_failure`] reports exhaustion exactly once:
/// on the failure that brings the count up to the maximum.
#[derive(Copy, Clone, Debug)]
pub struct RetryBudget {
    max: usize,
    failures: usize,
    target: &'static str,
}

/// A fixed delay between attempts.
///
/// Unlike a backoff, the delay never grows: every failed attempt pushes the
/// next one out by the same amount.
#[derive(Copy, Clone, Debug)]
pub struct FixedDelay {
    delay: Duration,
    next: Option<Instant>,
    target: &'static str,
}

// === impl RetryBudget ===

impl RetryBudget {
    pub const fn new(max: usize) -> Self {
        Self {
            max,
            failures: 0,
            target: "retry",
        }
    }

    pub const fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    /// Records a failure, returning `true` if this failure exhausted the
    /// budget.
    pub fn record_failure(&mut self) -> bool {
        if self.is_exhausted() {
            // already escalated for this run of failures.
            return false;
        }

        self.failures += 1;
        let remaining = self.remaining();
        if remaining == 0 {
            log::error!(target: self.target, "retry budget exhausted after {} failures", self.failures);
            return true;
        }

        log::warn!(target: self.target, "failure {}/{} ({remaining} retries remaining)", self.failures, self.max);
        false
    }

    /// Runs `op` until it succeeds or the budget is exhausted, returning the
    /// last error in the latter case.
    ///
    /// `op` is always called at least once, even if the budget is already
    /// exhausted.
    pub fn run<T, E: fmt::Debug>(&mut self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        loop {
            match op() {
                Ok(val) => {
                    self.record_success();
                    return Ok(val);
                }
                Err(error) => {
                    log::debug!(target: self.target, "attempt failed: {error:?}");
                    self.record_failure();
                    if self.is_exhausted() {
                        return Err(error);
                    }
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.failures > 0 {
            log::debug!(target: self.target, "success after {} failures; resetting", self.failures);
        }
        self.failures = 0;
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.max.saturating_sub(self.failures)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max
    }
}

// === impl FixedDelay ===

impl FixedDelay {
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: None,
            target: "retry",
        }
    }

    pub const fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    /// Returns `true` if an attempt may be made at `now`.
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.next.map_or(true, |next| now >= next)
    }

    /// Returns how long until the next attempt may be made.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next
            .map_or(Duration::ZERO, |next| next.saturating_duration_since(now))
    }

    /// Defers the next attempt until `delay` after `now`.
    pub fn defer(&mut self, now: Instant) {
        log::debug!(target: self.target, "next attempt in {:?}", self.delay);
        self.next = Some(now + self.delay);
    }

    pub fn reset(&mut self) {
        self.next = None;
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}
