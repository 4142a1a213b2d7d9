//! Escalation of exhausted retry budgets to a full restart.
use crate::retry::RetryBudget;

/// The platform's restart primitive.
///
/// On hardware, `restart` tears down and reinitializes the whole process and
/// never returns. Implementations used for simulation may return; callers
/// that invoke it report [`Escalation::Restart`] and must treat the system
/// as gone from that point on.
pub trait Restart {
    fn restart(&mut self);
}

/// What the caller should do after a component had a chance to escalate.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Escalation {
    Continue,
    /// A restart was requested. Nothing else should run.
    Restart,
}

/// Restarts the system once too many consecutive sensor reads have failed.
#[derive(Debug)]
pub struct FailureEscalator {
    budget: RetryBudget,
}

impl<R: Restart + ?Sized> Restart for &mut R {
    fn restart(&mut self) {
        (**self).restart()
    }
}

// === impl Escalation ===

impl Escalation {
    #[must_use]
    pub fn is_restart(self) -> bool {
        self == Self::Restart
    }
}

// === impl FailureEscalator ===

impl FailureEscalator {
    pub const fn new(max_retries: usize) -> Self {
        Self {
            budget: RetryBudget::new(max_retries).with_target("envmon::escalate"),
        }
    }

    /// Records the outcome of one sensor read.
    ///
    /// The `max_retries`th consecutive failure invokes `restart`.
    pub fn record_result(&mut self, success: bool, restart: &mut impl Restart) -> Escalation {
        if success {
            self.budget.record_success();
            return Escalation::Continue;
        }

        if !self.budget.record_failure() {
            return Escalation::Continue;
        }

        log::error!(
            target: "envmon::escalate",
            "maximum sensor error retries ({}) reached; restarting...",
            self.budget.max()
        );
        restart.restart();
        Escalation::Restart
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> usize {
        self.budget.failures()
    }

    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.budget.max()
    }
}
