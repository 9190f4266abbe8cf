//! Per-test deadline enforcement
//!
//! Guards each test of a sequential test loop with a deadline. Two strategies
//! are available:
//!
//! - **signal**: an interval timer interrupt (`SIGALRM`) delivered into the
//!   test thread, which captures its stack and raises an interrupt the test
//!   observes at [`interrupt::checkpoint`]. The failure reads
//!   `Failed: Timeout >{seconds}s`.
//! - **thread**: a watchdog thread that, on expiry, dumps the stack of every
//!   live thread to the diagnostic stream between `++ Timeout ++` markers and
//!   has the test marked failed once it returns.
//!
//! ```no_run
//! use test_timeout::{Directive, PolicyResolver, TimeoutHooks, TimeoutSettings, interrupt};
//! use std::time::Duration;
//!
//! let resolver = PolicyResolver::builder()
//!     .command_line(TimeoutSettings::new().with_timeout(1.0))
//!     .build();
//! let hooks = TimeoutHooks::new(resolver);
//!
//! let outcome = hooks.run_test(Some(&Directive::seconds(2.0)), || {
//!     interrupt::sleep(Duration::from_secs(3))?;
//!     Ok(())
//! });
//! assert!(outcome.timeout_report().is_some());
//! ```

pub mod error;
pub mod harness;
pub mod interrupt;
pub mod lifecycle;
pub mod policy;
pub mod report;
pub mod stack;
pub mod timer;
pub mod types;

pub use error::{ConfigError, Result, TimeoutError};
pub use harness::{ConsoleReporter, RunSummary, TestCase, TestReporter, TestSuite};
pub use lifecycle::{TestFailure, TestOutcome, TestResult, TimeoutHooks};
pub use policy::{PolicyResolver, PolicyResolverBuilder, TimeoutSettings};
pub use report::{DiagnosticStream, TimeoutReport, REPORT_MARKER};
pub use stack::{Frame, StackSnapshot, ThreadIdentity};
pub use timer::{create_strategy, signal_available, ArmedTimer, DeadlineStrategy, ThreadStrategy};
pub use types::{Directive, DirectiveArg, TimeoutMethod, TimeoutPolicy};

#[cfg(unix)]
pub use timer::SignalStrategy;

#[cfg(test)]
mod tests;
