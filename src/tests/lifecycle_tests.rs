//! Tests for the before/after test hooks

use crate::tests::test_utils::{command_line_hooks, init_logging};
use crate::*;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_zero_timeout_arms_nothing() {
    let (hooks, _) = command_line_hooks(0.0, TimeoutMethod::Thread);
    let timer = hooks.before_test(None).unwrap();
    assert!(timer.is_none());
    assert!(hooks.after_test(timer).is_none());
}

#[test]
#[serial]
fn test_zero_timeout_never_fires() {
    let (hooks, diagnostics) = command_line_hooks(0.0, TimeoutMethod::Thread);
    let outcome = hooks.run_test(None, || {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    assert!(outcome.is_success());
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}

#[test]
#[serial]
fn test_configuration_error_skips_body() {
    let (hooks, _) = command_line_hooks(0.0, TimeoutMethod::Thread);
    let ran = AtomicBool::new(false);
    let outcome = hooks.run_test(Some(&Directive::seconds("foo")), || {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    });

    assert!(!ran.load(Ordering::SeqCst));
    match outcome {
        TestOutcome::SetupError(e) => {
            assert!(e.is_configuration());
            assert!(e.to_string().contains("ValueError"));
        }
        other => panic!("Expected setup error, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_unrepresentable_timeout_is_a_setup_error() {
    for method in [TimeoutMethod::Signal, TimeoutMethod::Thread] {
        let (hooks, _) = command_line_hooks(1e20, method);
        let outcome = hooks.run_test(None, || Ok(()));
        match outcome {
            TestOutcome::SetupError(e) => assert!(e.is_configuration()),
            other => panic!("Expected setup error, got {other:?}"),
        }
    }
}

#[test]
#[serial]
fn test_fast_test_passes_under_thread_timeout() {
    let (hooks, diagnostics) = command_line_hooks(2.0, TimeoutMethod::Thread);
    let outcome = hooks.run_test(None, || Ok(()));
    assert!(outcome.is_success());
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}

#[test]
#[serial]
fn test_thread_timeout_marks_test_failed_after_return() {
    init_logging();
    let (hooks, diagnostics) = command_line_hooks(0.2, TimeoutMethod::Thread);
    let outcome = hooks.run_test(None, || {
        thread::sleep(Duration::from_millis(700));
        Ok(())
    });

    let report = outcome.timeout_report().expect("should time out");
    assert_eq!(report.method(), TimeoutMethod::Thread);
    assert_eq!(outcome.status(), "FAILED");
    let text = diagnostics.contents().unwrap();
    assert!(text.starts_with(REPORT_MARKER));
    assert_eq!(text.lines().last(), Some(REPORT_MARKER));
}

#[test]
#[serial]
fn test_timeout_wins_over_body_failure() {
    let (hooks, _) = command_line_hooks(0.1, TimeoutMethod::Thread);
    let outcome = hooks.run_test(None, || {
        thread::sleep(Duration::from_millis(500));
        Err(TestFailure::new("assert False"))
    });
    assert!(matches!(outcome, TestOutcome::TimedOut(_)));
}

#[test]
#[serial]
fn test_body_failure_and_panic_are_reported() {
    let (hooks, _) = command_line_hooks(5.0, TimeoutMethod::Thread);
    let failed = hooks.run_test(None, || Err("boom".into()));
    match failed {
        TestOutcome::Failed(failure) => assert_eq!(failure.message(), "boom"),
        other => panic!("Expected failure, got {other:?}"),
    }

    let panicked = hooks.run_test(None, || panic!("kaboom"));
    match panicked {
        TestOutcome::Failed(failure) => assert!(failure.message().contains("kaboom")),
        other => panic!("Expected failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
#[serial]
fn test_signal_timeout_summary() {
    let (hooks, diagnostics) = command_line_hooks(0.2, TimeoutMethod::Signal);
    let outcome = hooks.run_test(None, || {
        interrupt::sleep(Duration::from_secs(2))?;
        Err(TestFailure::new("assert False"))
    });

    let report = outcome.timeout_report().expect("should time out");
    assert_eq!(report.summary(), "Failed: Timeout >0.2s");
    assert!(report.render_failure().starts_with("Failed: Timeout >0.2s\n~~ Stack of "));
    // The signal method reports through the outcome only
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_directive_overrides_command_line_zero() {
    let (hooks, _) = command_line_hooks(0.0, TimeoutMethod::Signal);
    let outcome = hooks.run_test(Some(&Directive::seconds(0.2)), || {
        interrupt::sleep(Duration::from_secs(2))?;
        Ok(())
    });
    let report = outcome.timeout_report().expect("directive should be enforced");
    assert_eq!(report.summary(), "Failed: Timeout >0.2s");
}

#[test]
#[serial]
fn test_directive_method_override() {
    let (hooks, diagnostics) = command_line_hooks(0.0, TimeoutMethod::Signal);
    let directive = Directive::with_method(0.1, "thread");
    let outcome = hooks.run_test(Some(&directive), || {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });
    let report = outcome.timeout_report().expect("should time out");
    assert_eq!(report.method(), TimeoutMethod::Thread);
    assert!(diagnostics.contents().unwrap().contains(REPORT_MARKER));
}

#[test]
#[serial]
fn test_sequential_tests_do_not_leak_deadlines() {
    let (hooks, diagnostics) = command_line_hooks(0.3, TimeoutMethod::Thread);
    for _ in 0..3 {
        let outcome = hooks.run_test(None, || {
            thread::sleep(Duration::from_millis(150));
            Ok(())
        });
        assert!(outcome.is_success());
    }
    // 450ms in total, but each test had its own fresh deadline
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}
