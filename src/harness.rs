//! Minimal sequential test runner driving the timeout hooks
//!
//! Stands in for the host framework: it owns no discovery or flag parsing,
//! just runs registered cases one at a time and hands outcomes to a reporter.

use crate::error::Result;
use crate::lifecycle::{TestOutcome, TestResult, TimeoutHooks};
use crate::types::Directive;
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

type TestBody = Box<dyn Fn() -> TestResult + Send + Sync>;

/// A named test with an optional timeout directive
pub struct TestCase {
    name: String,
    directive: Option<Directive>,
    body: TestBody,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> TestResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            directive: None,
            body: Box::new(body),
        }
    }

    /// Attach a per-test timeout directive
    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("directive", &self.directive)
            .finish_non_exhaustive()
    }
}

/// Host-side reporting hooks
pub trait TestReporter {
    fn test_started(&mut self, _name: &str) -> io::Result<()> {
        Ok(())
    }

    fn record_outcome(&mut self, name: &str, outcome: &TestOutcome, duration: Duration) -> io::Result<()>;

    fn print_report(&mut self, summary: &RunSummary) -> io::Result<()>;
}

/// Counts for one run of a suite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errors: usize,
    pub duration: Duration,
}

impl RunSummary {
    fn record(&mut self, outcome: &TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed(_) => self.failed += 1,
            TestOutcome::TimedOut(_) => self.timed_out += 1,
            TestOutcome::SetupError(_) => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.timed_out + self.errors
    }

    /// Tests that failed for any reason, timeouts included
    pub fn failures(&self) -> usize {
        self.failed + self.timed_out
    }

    /// 0 when every test passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failures() + self.errors == 0 {
            0
        } else {
            1
        }
    }

    /// `=== 1 failed, 2 passed in 1.03s ===`
    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if self.failures() > 0 {
            parts.push(format!("{} failed", self.failures()));
        }
        if self.passed > 0 || self.total() == 0 {
            parts.push(format!("{} passed", self.passed));
        }
        if self.errors > 0 {
            parts.push(format!(
                "{} error{}",
                self.errors,
                if self.errors == 1 { "" } else { "s" }
            ));
        }
        format!(
            "=== {} in {:.2}s ===",
            parts.join(", "),
            self.duration.as_secs_f64()
        )
    }
}

/// An ordered collection of test cases
#[derive(Debug, Default)]
pub struct TestSuite {
    cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, case: TestCase) -> &mut Self {
        self.cases.push(case);
        self
    }

    pub fn with(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Run every case in order. Each case's timer is disarmed before the
    /// next one is armed.
    pub fn run(&self, hooks: &TimeoutHooks, reporter: &mut dyn TestReporter) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        for case in &self.cases {
            reporter.test_started(case.name())?;
            let case_started = Instant::now();
            let outcome = hooks.run_test(case.directive(), || (case.body)());
            summary.record(&outcome);
            reporter.record_outcome(case.name(), &outcome, case_started.elapsed())?;
        }

        summary.duration = started.elapsed();
        log::info!(
            "Ran {} tests: {} passed, {} failed, {} timed out, {} errors",
            summary.total(),
            summary.passed,
            summary.failed,
            summary.timed_out,
            summary.errors
        );
        reporter.print_report(&summary)?;
        Ok(summary)
    }
}

/// Prints result lines, failure details and a closing summary line
pub struct ConsoleReporter<W: Write> {
    out: W,
    failures: Vec<(String, String)>,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            failures: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TestReporter for ConsoleReporter<W> {
    fn record_outcome(&mut self, name: &str, outcome: &TestOutcome, duration: Duration) -> io::Result<()> {
        writeln!(self.out, "{} {} ({:.2}s)", name, outcome.status(), duration.as_secs_f64())?;
        let detail = match outcome {
            TestOutcome::Passed => return Ok(()),
            TestOutcome::Failed(failure) => format!("Failed: {}\n", failure),
            TestOutcome::TimedOut(report) => report.render_failure(),
            TestOutcome::SetupError(e) => format!("{}\n", e),
        };
        self.failures.push((name.to_string(), detail));
        Ok(())
    }

    fn print_report(&mut self, summary: &RunSummary) -> io::Result<()> {
        if !self.failures.is_empty() {
            writeln!(self.out, "=== FAILURES ===")?;
            for (name, detail) in self.failures.drain(..) {
                writeln!(self.out, "___ {} ___", name)?;
                write!(self.out, "{}", detail)?;
            }
        }
        writeln!(self.out, "{}", summary.summary_line())?;
        self.out.flush()
    }
}
