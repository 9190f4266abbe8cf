//! Tests for the thread deadline strategy

use crate::tests::test_utils::{assert_lines_in_order, init_logging};
use crate::*;
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn current_name() -> String {
    thread::current().name().unwrap_or("<unnamed>").to_string()
}

fn wait_for_report(diagnostics: &DiagnosticStream) -> String {
    let give_up = Instant::now() + Duration::from_secs(10);
    loop {
        let written = diagnostics.contents().unwrap_or_default();
        if written.ends_with(&format!("{}\n", REPORT_MARKER)) || Instant::now() >= give_up {
            return written;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(target_os = "linux")]
fn live_watchdogs() -> usize {
    // comm is truncated to 15 bytes
    let prefix = &timer::WATCHDOG_THREAD_NAME[..15];
    std::fs::read_dir("/proc/self/task")
        .unwrap()
        .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("comm")).ok())
        .filter(|comm| comm.trim_end() == prefix)
        .count()
}

#[test]
#[serial]
fn test_thread_report_written_before_disarm() {
    init_logging();
    let diagnostics = DiagnosticStream::capture();
    let strategy = ThreadStrategy::new(diagnostics.clone());
    let policy = TimeoutPolicy::new(0.2, TimeoutMethod::Thread).unwrap();
    let timer = strategy.arm(&policy).unwrap();

    // Printed while the test is still running
    let written = wait_for_report(&diagnostics);
    assert!(written.contains(REPORT_MARKER));
    assert!(timer.has_fired());

    let report = timer.disarm().expect("deadline should have fired");
    assert_eq!(report.summary(), "Failed: Timeout >0.2s");
    assert!(report.elapsed() >= Duration::from_millis(200));
    assert_eq!(report.render_thread_dump(), written);
}

#[test]
#[serial]
fn test_thread_report_format() {
    let diagnostics = DiagnosticStream::capture();
    let strategy = ThreadStrategy::new(diagnostics.clone());
    let policy = TimeoutPolicy::new(0.1, TimeoutMethod::Thread).unwrap();
    let timer = strategy.arm(&policy).unwrap();
    thread::sleep(Duration::from_millis(600));
    let report = timer.disarm().expect("deadline should have fired");

    let text = diagnostics.contents().unwrap();
    let name = current_name();
    let target_header = format!("*~~ Stack of {}:* ~~*", name);
    assert_lines_in_order(
        &text,
        &["*++ Timeout ++*", target_header.as_str(), "*File *, line *, in *", "*++ Timeout ++*"],
    );
    assert_eq!(text.lines().last(), Some(REPORT_MARKER));

    // Test thread listed first, one header per captured thread
    let headers = text.lines().filter(|line| line.starts_with("~~ Stack of ")).count();
    assert_eq!(headers, report.stacks().len());
    assert!(report.stacks()[0].is_target);
    assert_eq!(report.stacks()[0].thread_name, name);
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_thread_report_lists_every_thread() {
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let helper = thread::Builder::new()
        .name("idle-helper".to_string())
        .spawn(move || {
            let _ = stop_rx.recv();
        })
        .unwrap();

    let diagnostics = DiagnosticStream::capture();
    let policy = TimeoutPolicy::new(0.1, TimeoutMethod::Thread).unwrap();
    let timer = ThreadStrategy::new(diagnostics.clone()).arm(&policy).unwrap();
    thread::sleep(Duration::from_millis(600));
    let report = timer.disarm().expect("deadline should have fired");

    stop_tx.send(()).unwrap();
    helper.join().unwrap();

    let names: Vec<&str> = report
        .stacks()
        .iter()
        .map(|stack| stack.thread_name.as_str())
        .collect();
    assert!(names.contains(&"idle-helper"));
    assert!(names.contains(&crate::timer::WATCHDOG_THREAD_NAME));
    let target = report.target_stack().unwrap();
    assert!(!target.frames.is_empty());
}

#[test]
#[serial]
fn test_thread_cancelled_before_expiry() {
    let diagnostics = DiagnosticStream::capture();
    let policy = TimeoutPolicy::new(5.0, TimeoutMethod::Thread).unwrap();
    let timer = ThreadStrategy::new(diagnostics.clone()).arm(&policy).unwrap();
    thread::sleep(Duration::from_millis(20));

    assert!(!timer.has_fired());
    assert!(timer.disarm().is_none());
    assert_eq!(diagnostics.contents().as_deref(), Some(""));

    #[cfg(target_os = "linux")]
    assert_eq!(live_watchdogs(), 0);
}

#[test]
#[serial]
fn test_thread_drop_disarms() {
    let diagnostics = DiagnosticStream::capture();
    let policy = TimeoutPolicy::new(0.2, TimeoutMethod::Thread).unwrap();
    {
        let _timer = ThreadStrategy::new(diagnostics.clone()).arm(&policy).unwrap();
    }
    thread::sleep(Duration::from_millis(400));
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}

#[test]
#[serial]
fn test_deadline_beyond_clock_range_never_fires() {
    let diagnostics = DiagnosticStream::capture();
    // Representable as a Duration, but past the end of Instant
    let policy = TimeoutPolicy::new(1.5e19, TimeoutMethod::Thread).unwrap();
    let timer = ThreadStrategy::new(diagnostics.clone()).arm(&policy).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(!timer.has_fired());
    let started = Instant::now();
    assert!(timer.disarm().is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(diagnostics.contents().as_deref(), Some(""));
}

#[test]
#[serial]
fn test_busy_watchdog_is_detached_after_join_wait() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let diagnostics = DiagnosticStream::Captured(buffer.clone());
    let strategy = ThreadStrategy::new(diagnostics.clone()).with_join_wait(Duration::from_millis(200));
    let policy = TimeoutPolicy::new(0.05, TimeoutMethod::Thread).unwrap();

    // Holding the buffer stalls the watchdog inside its report write
    let held = buffer.lock().unwrap();
    let timer = strategy.arm(&policy).unwrap();
    thread::sleep(Duration::from_millis(400));
    assert!(timer.has_fired());

    let started = Instant::now();
    let report = timer.disarm().expect("a started firing still fails the test");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(200));
    assert!(waited < Duration::from_secs(2));
    assert_eq!(report.summary(), "Failed: Timeout >0.05s");
    assert!(report.target_stack().is_some());

    // The detached watchdog finishes its write once the buffer is free
    drop(held);
    assert!(wait_for_report(&diagnostics).contains(REPORT_MARKER));
    thread::sleep(Duration::from_millis(50));
}
