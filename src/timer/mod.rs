//! Deadline timers for guarded tests
//!
//! A [`DeadlineStrategy`] arms a deadline for the calling thread and hands back
//! an [`ArmedTimer`]. The timer is cancelled when it is disarmed or dropped,
//! whichever comes first, so callers never balance arm/disarm by hand.

use crate::error::{Result, TimeoutError};
use crate::report::{DiagnosticStream, TimeoutReport};
use crate::types::{TimeoutMethod, TimeoutPolicy};
use once_cell::sync::Lazy;
use std::time::Instant;

// Platform-specific implementations
#[cfg(unix)]
mod signal;

mod thread;

pub use thread::ThreadStrategy;

#[cfg(unix)]
pub use signal::SignalStrategy;

/// Name given to thread-method watchdog threads
pub const WATCHDOG_THREAD_NAME: &str = "test-timeout-watchdog";

/// Arms deadlines using one enforcement method
pub trait DeadlineStrategy: Send + Sync {
    fn method(&self) -> TimeoutMethod;

    /// Arm a deadline for the calling thread
    fn arm(&self, policy: &TimeoutPolicy) -> Result<ArmedTimer>;
}

/// The live half of an armed deadline
pub(crate) trait ActiveDeadline {
    /// Cancel the deadline. Returns the report if it fired first.
    fn disarm(&mut self) -> Option<TimeoutReport>;

    fn has_fired(&self) -> bool;
}

/// One deadline tied to one in-flight test
pub struct ArmedTimer {
    policy: TimeoutPolicy,
    armed_at: Instant,
    inner: Option<Box<dyn ActiveDeadline>>,
}

impl ArmedTimer {
    pub(crate) fn new(policy: TimeoutPolicy, inner: Box<dyn ActiveDeadline>) -> Self {
        Self {
            policy,
            armed_at: Instant::now(),
            inner: Some(inner),
        }
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Whether the deadline has fired and not yet been collected
    pub fn has_fired(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.has_fired())
    }

    /// Cancel the deadline, returning the report if it fired first
    pub fn disarm(mut self) -> Option<TimeoutReport> {
        let report = self.inner.take().and_then(|mut inner| inner.disarm());
        log::debug!(
            "Disarmed {} timer after {:?} (fired: {})",
            self.policy.method(),
            self.armed_at.elapsed(),
            report.is_some()
        );
        report
    }
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Some(report) = inner.disarm() {
                log::warn!("Timeout timer dropped after firing: {}", report.summary());
            }
        }
    }
}

static SIGNAL_AVAILABLE: Lazy<bool> = Lazy::new(probe_signal);

/// Whether the signal method can run on this host. Probed once.
pub fn signal_available() -> bool {
    *SIGNAL_AVAILABLE
}

#[cfg(unix)]
fn probe_signal() -> bool {
    let available = signal::probe();
    log::debug!("Signal timeout support: {}", available);
    available
}

#[cfg(not(unix))]
fn probe_signal() -> bool {
    false
}

/// Create the strategy implementing `method`
pub fn create_strategy(
    method: TimeoutMethod,
    diagnostics: DiagnosticStream,
) -> Result<Box<dyn DeadlineStrategy>> {
    match method {
        TimeoutMethod::Thread => Ok(Box::new(ThreadStrategy::new(diagnostics))),
        TimeoutMethod::Signal => create_signal_strategy(),
    }
}

#[cfg(unix)]
fn create_signal_strategy() -> Result<Box<dyn DeadlineStrategy>> {
    if !signal_available() {
        return Err(TimeoutError::StrategyUnavailable(
            "SIGALRM cannot be used on this host".to_string(),
        ));
    }
    Ok(Box::new(SignalStrategy::new()))
}

#[cfg(not(unix))]
fn create_signal_strategy() -> Result<Box<dyn DeadlineStrategy>> {
    Err(TimeoutError::StrategyUnavailable(
        "interval timer signals are only available on unix".to_string(),
    ))
}
