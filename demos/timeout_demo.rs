//! Runs a tiny suite under both timeout methods
//!
//! Try `RUST_LOG=debug cargo run --example timeout_demo` to watch timers being
//! armed and disarmed, or set `TEST_TIMEOUT` / `TEST_TIMEOUT_METHOD`.

use std::thread;
use std::time::Duration;
use test_timeout::{
    interrupt, ConsoleReporter, Directive, PolicyResolver, TestCase, TestFailure, TestSuite,
    TimeoutHooks, TimeoutMethod, TimeoutSettings,
};

fn build_suite() -> TestSuite {
    TestSuite::new()
        .with(TestCase::new("test_quick", || Ok(())))
        .with(TestCase::new("test_cooperative_sleep", || {
            interrupt::sleep(Duration::from_secs(3))?;
            Ok(())
        }))
        .with(
            TestCase::new("test_blocking_sleep", || {
                thread::sleep(Duration::from_secs(2));
                Err(TestFailure::new("should have timed out first"))
            })
            .with_directive(Directive::with_method(1.0, TimeoutMethod::Thread)),
        )
        .with(TestCase::new("test_bad_directive", || Ok(())).with_directive(Directive::seconds("soon")))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let resolver = PolicyResolver::builder()
        .environment(TimeoutSettings::from_env()?)
        .project(TimeoutSettings::from_pairs([("timeout", "1")])?)
        .build();
    println!(
        "[{}] Running with default method {}\n",
        chrono::Local::now().format("%H:%M:%S"),
        resolver.default_method()
    );

    let hooks = TimeoutHooks::new(resolver);
    let mut reporter = ConsoleReporter::stdout();
    let summary = build_suite().run(&hooks, &mut reporter)?;

    std::process::exit(summary.exit_code());
}
