//! Lifecycle hooks that guard each test with a deadline
//!
//! The host framework calls [`TimeoutHooks::before_test`] and
//! [`TimeoutHooks::after_test`] around every test, or lets
//! [`TimeoutHooks::run_test`] do both. A fired deadline always wins over the
//! test's own result, so the report and the recorded outcome never disagree.

use crate::error::{Result, TimeoutError};
use crate::interrupt::Interrupted;
use crate::policy::PolicyResolver;
use crate::report::{DiagnosticStream, TimeoutReport};
use crate::timer::{self, ArmedTimer};
use crate::types::Directive;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// What a test body returns
pub type TestResult = std::result::Result<(), TestFailure>;

/// A test's own failure, as opposed to a timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    message: String,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestFailure {}

impl From<Interrupted> for TestFailure {
    fn from(err: Interrupted) -> Self {
        TestFailure::new(err.to_string())
    }
}

impl From<String> for TestFailure {
    fn from(message: String) -> Self {
        TestFailure::new(message)
    }
}

impl From<&str> for TestFailure {
    fn from(message: &str) -> Self {
        TestFailure::new(message)
    }
}

/// Final result of one guarded test
#[derive(Debug)]
pub enum TestOutcome {
    Passed,
    /// The body returned an error or panicked
    Failed(TestFailure),
    /// The deadline fired before the timer was disarmed
    TimedOut(TimeoutReport),
    /// The timeout could not be set up; the body did not run
    SetupError(TimeoutError),
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn timeout_report(&self) -> Option<&TimeoutReport> {
        match self {
            TestOutcome::TimedOut(report) => Some(report),
            _ => None,
        }
    }

    /// Short status word for per-test result lines
    pub fn status(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "PASSED",
            TestOutcome::Failed(_) | TestOutcome::TimedOut(_) => "FAILED",
            TestOutcome::SetupError(_) => "ERROR",
        }
    }
}

/// Before/after hooks arming a deadline around each test
#[derive(Debug, Clone, Default)]
pub struct TimeoutHooks {
    resolver: PolicyResolver,
    diagnostics: DiagnosticStream,
}

impl TimeoutHooks {
    pub fn new(resolver: PolicyResolver) -> Self {
        Self {
            resolver,
            diagnostics: DiagnosticStream::default(),
        }
    }

    /// Send thread-method reports somewhere other than stderr
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticStream) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    pub fn diagnostics(&self) -> &DiagnosticStream {
        &self.diagnostics
    }

    /// Resolve the test's policy and arm its timer.
    /// A zero timeout arms nothing.
    pub fn before_test(&self, directive: Option<&Directive>) -> Result<Option<ArmedTimer>> {
        let policy = self.resolver.resolve(directive)?;
        if !policy.is_enforced() {
            return Ok(None);
        }
        let strategy = timer::create_strategy(policy.method(), self.diagnostics.clone())?;
        strategy.arm(&policy).map(Some)
    }

    /// Disarm the test's timer, returning the report if it fired
    pub fn after_test(&self, timer: Option<ArmedTimer>) -> Option<TimeoutReport> {
        timer.and_then(ArmedTimer::disarm)
    }

    /// Run one test body between the hooks
    pub fn run_test<F>(&self, directive: Option<&Directive>, body: F) -> TestOutcome
    where
        F: FnOnce() -> TestResult,
    {
        let timer = match self.before_test(directive) {
            Ok(timer) => timer,
            Err(e) => {
                log::error!("Failed to set up test timeout: {}", e);
                return TestOutcome::SetupError(e);
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(body));

        if let Some(report) = self.after_test(timer) {
            return TestOutcome::TimedOut(report);
        }
        match result {
            Ok(Ok(())) => TestOutcome::Passed,
            Ok(Err(failure)) => TestOutcome::Failed(failure),
            Err(payload) => TestOutcome::Failed(TestFailure::new(panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
