//! Thread deadline strategy
//!
//! A watchdog thread parks until the deadline. If it is not aborted first it
//! snapshots every live thread, writes the `++ Timeout ++` block to the
//! diagnostic stream straight away, and leaves the report for the lifecycle to
//! collect. The test thread itself is never touched.

use super::{ActiveDeadline, ArmedTimer, DeadlineStrategy, WATCHDOG_THREAD_NAME};
use crate::error::Result;
use crate::report::{DiagnosticStream, TimeoutReport};
use crate::stack::{self, ThreadIdentity};
use crate::types::{TimeoutMethod, TimeoutPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default upper bound on waiting for the watchdog during disarm
const JOIN_WAIT: Duration = Duration::from_secs(5);
const JOIN_POLL: Duration = Duration::from_millis(1);

/// Deadline enforcement through a background watchdog thread
#[derive(Debug, Clone)]
pub struct ThreadStrategy {
    diagnostics: DiagnosticStream,
    join_wait: Duration,
}

impl ThreadStrategy {
    pub fn new(diagnostics: DiagnosticStream) -> Self {
        Self {
            diagnostics,
            join_wait: JOIN_WAIT,
        }
    }

    /// How long disarm waits for a busy watchdog before detaching it
    pub fn with_join_wait(mut self, join_wait: Duration) -> Self {
        self.join_wait = join_wait;
        self
    }
}

impl Default for ThreadStrategy {
    fn default() -> Self {
        Self::new(DiagnosticStream::default())
    }
}

impl DeadlineStrategy for ThreadStrategy {
    fn method(&self) -> TimeoutMethod {
        TimeoutMethod::Thread
    }

    fn arm(&self, policy: &TimeoutPolicy) -> Result<ArmedTimer> {
        let target = ThreadIdentity::current();
        let shared = Arc::new(WatchdogState::default());
        let started = Instant::now();

        let watchdog = Watchdog {
            policy: *policy,
            target: target.clone(),
            shared: shared.clone(),
            diagnostics: self.diagnostics.clone(),
            started,
        };
        let worker = thread::Builder::new()
            .name(WATCHDOG_THREAD_NAME.to_string())
            .spawn(move || watchdog.run())?;

        log::debug!(
            "Armed thread timer for {}s on thread {}",
            policy.seconds(),
            target.name
        );
        Ok(ArmedTimer::new(
            *policy,
            Box::new(ThreadDeadline {
                policy: *policy,
                target,
                shared,
                started,
                join_wait: self.join_wait,
                worker: Some(worker),
            }),
        ))
    }
}

#[derive(Default)]
struct WatchdogState {
    abort: AtomicBool,
    firing: AtomicBool,
    report: Mutex<Option<TimeoutReport>>,
}

struct Watchdog {
    policy: TimeoutPolicy,
    target: ThreadIdentity,
    shared: Arc<WatchdogState>,
    diagnostics: DiagnosticStream,
    started: Instant,
}

impl Watchdog {
    fn run(self) {
        // A deadline past the end of the clock never fires.
        let deadline = self.started.checked_add(self.policy.duration());
        loop {
            if self.shared.abort.load(Ordering::Acquire) {
                return;
            }
            // Spurious wakeups just go round again.
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        }

        self.shared.firing.store(true, Ordering::Release);
        let elapsed = self.started.elapsed();
        let stacks = stack::dump_threads(&self.target);
        let report = TimeoutReport::new(&self.policy, elapsed, stacks);
        log::warn!(
            "Test thread {} exceeded its deadline: {}",
            self.target.name,
            report.summary()
        );
        if let Err(e) = self.diagnostics.write_block(&report.render_thread_dump()) {
            log::error!("Failed to write timeout report: {}", e);
        }

        let mut slot = self
            .shared
            .report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(report);
    }
}

struct ThreadDeadline {
    policy: TimeoutPolicy,
    target: ThreadIdentity,
    shared: Arc<WatchdogState>,
    started: Instant,
    join_wait: Duration,
    worker: Option<JoinHandle<()>>,
}

impl ThreadDeadline {
    fn take_report(&self) -> Option<TimeoutReport> {
        self.shared
            .report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl ActiveDeadline for ThreadDeadline {
    fn disarm(&mut self) -> Option<TimeoutReport> {
        let worker = self.worker.take()?;
        self.shared.abort.store(true, Ordering::Release);
        worker.thread().unpark();

        let wait_until = Instant::now() + self.join_wait;
        while !worker.is_finished() && Instant::now() < wait_until {
            thread::sleep(JOIN_POLL);
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                log::error!("Timeout watchdog thread panicked");
            }
        } else {
            log::warn!(
                "Timeout watchdog still busy after {:?}, detaching it",
                self.join_wait
            );
        }

        if !self.shared.firing.load(Ordering::Acquire) {
            return None;
        }
        // A detached watchdog may not have stored its report yet; the failure
        // still stands.
        self.take_report().or_else(|| {
            Some(TimeoutReport::new(
                &self.policy,
                self.started.elapsed(),
                vec![self.target.snapshot(Vec::new())],
            ))
        })
    }

    fn has_fired(&self) -> bool {
        self.worker.is_some() && self.shared.firing.load(Ordering::Acquire)
    }
}
