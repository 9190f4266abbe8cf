//! Signal deadline strategy using `setitimer(ITIMER_REAL)` and `SIGALRM`
//!
//! The process-wide handler is installed on first use and stays installed; it
//! does nothing while no timer is armed. `SIGALRM` is process-directed, so the
//! handler forwards it to the armed test thread when the kernel picks another.

use super::{ActiveDeadline, ArmedTimer, DeadlineStrategy};
use crate::error::{Result, TimeoutError};
use crate::interrupt;
use crate::report::TimeoutReport;
use crate::stack::{self, sys, RawStackSlot, ThreadIdentity};
use crate::types::{TimeoutMethod, TimeoutPolicy};
use libc::c_int;
use once_cell::sync::Lazy;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

static INSTALLED: Lazy<std::result::Result<(), String>> = Lazy::new(|| {
    sys::install_handler(libc::SIGALRM, on_alarm).map_err(|e| e.to_string())
});

/// Held by the single armed signal timer
static IN_USE: AtomicBool = AtomicBool::new(false);
/// Set while the countdown may still fire; cleared by whoever gets there first
static ARMED: AtomicBool = AtomicBool::new(false);
static FIRED: AtomicBool = AtomicBool::new(false);
static TARGET: AtomicUsize = AtomicUsize::new(0);
/// Bumped on every arm so a handler can tell one arming from the next
static GENERATION: AtomicUsize = AtomicUsize::new(0);
/// Handlers currently forwarding to `TARGET`; disarm waits for zero
static FORWARDING: AtomicUsize = AtomicUsize::new(0);
static ARMED_AT: AtomicU64 = AtomicU64::new(0);
static COUNTDOWN_NANOS: AtomicU64 = AtomicU64::new(0);
static FIRED_AT: AtomicU64 = AtomicU64::new(0);
static SLOT: RawStackSlot = RawStackSlot::new();

/// Deliveries this far ahead of the countdown are stale forwards
const EARLY_SLACK_NANOS: u64 = 1_000_000;

extern "C" fn on_alarm(_signum: c_int) {
    let _errno = sys::ErrnoGuard::new();
    let generation = GENERATION.load(Ordering::SeqCst);
    if !ARMED.load(Ordering::SeqCst) {
        return;
    }
    let target = TARGET.load(Ordering::SeqCst);
    let me = interrupt::current_token();
    if me != target {
        FORWARDING.fetch_add(1, Ordering::SeqCst);
        // Disarm drains FORWARDING before the target may exit, so a target
        // still armed under the same generation here is alive.
        if ARMED.load(Ordering::SeqCst) && GENERATION.load(Ordering::SeqCst) == generation {
            let _ = sys::forward(target, libc::SIGALRM);
        }
        FORWARDING.fetch_sub(1, Ordering::SeqCst);
        return;
    }
    let elapsed = sys::monotonic_nanos().saturating_sub(ARMED_AT.load(Ordering::SeqCst));
    if elapsed.saturating_add(EARLY_SLACK_NANOS) < COUNTDOWN_NANOS.load(Ordering::SeqCst) {
        return;
    }
    if ARMED
        .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    FIRED_AT.store(sys::monotonic_nanos(), Ordering::Relaxed);
    // SAFETY: running on the target thread.
    unsafe { SLOT.record(me) };
    FIRED.store(true, Ordering::Release);
    interrupt::raise();
}

/// Whether `SIGALRM` can be inspected and the handler installed
pub(super) fn probe() -> bool {
    if !sys::can_query(libc::SIGALRM) {
        return false;
    }
    match INSTALLED.as_ref() {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Failed to install SIGALRM handler: {}", e);
            false
        }
    }
}

/// Largest `it_value` the BSD family accepts; longer deadlines are clamped
const MAX_COUNTDOWN_SECS: u64 = 100_000_000;

fn clamp_countdown(duration: Duration) -> Duration {
    duration.min(Duration::from_secs(MAX_COUNTDOWN_SECS))
}

/// Schedule (or, with a zero duration, cancel) the one-shot countdown.
/// Rounded to whole microseconds; a positive duration never rounds to zero.
fn set_countdown(duration: Duration) -> io::Result<()> {
    let duration = clamp_countdown(duration);
    let mut micros = duration.as_micros();
    if micros == 0 && !duration.is_zero() {
        micros = 1;
    }
    let value = libc::timeval {
        tv_sec: (micros / 1_000_000) as libc::time_t,
        tv_usec: (micros % 1_000_000) as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: value,
    };
    // SAFETY: both pointers are valid for the duration of the call.
    if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Deadline enforcement through an interval timer interrupt
#[derive(Debug, Default)]
pub struct SignalStrategy;

impl SignalStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl DeadlineStrategy for SignalStrategy {
    fn method(&self) -> TimeoutMethod {
        TimeoutMethod::Signal
    }

    fn arm(&self, policy: &TimeoutPolicy) -> Result<ArmedTimer> {
        INSTALLED
            .as_ref()
            .map_err(|e| TimeoutError::StrategyUnavailable(e.clone()))?;
        if IN_USE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TimeoutError::AlreadyArmed);
        }

        let identity = ThreadIdentity::current();
        SLOT.reset();
        FIRED.store(false, Ordering::SeqCst);
        GENERATION.fetch_add(1, Ordering::SeqCst);
        TARGET.store(identity.token, Ordering::SeqCst);
        interrupt::set_target(identity.token);
        let countdown = clamp_countdown(policy.duration()).as_nanos() as u64;
        COUNTDOWN_NANOS.store(countdown, Ordering::SeqCst);
        ARMED_AT.store(sys::monotonic_nanos(), Ordering::SeqCst);
        ARMED.store(true, Ordering::SeqCst);

        if let Err(e) = set_countdown(policy.duration()) {
            ARMED.store(false, Ordering::SeqCst);
            drain_forwards();
            interrupt::clear();
            TARGET.store(0, Ordering::Release);
            IN_USE.store(false, Ordering::Release);
            return Err(TimeoutError::Platform(format!("setitimer failed: {}", e)));
        }

        log::debug!(
            "Armed signal timer for {}s on thread {}",
            policy.seconds(),
            identity.name
        );
        Ok(ArmedTimer::new(
            *policy,
            Box::new(SignalDeadline {
                policy: *policy,
                identity,
                active: true,
            }),
        ))
    }
}

/// Wait out handlers that may still be signalling the old target
fn drain_forwards() {
    while FORWARDING.load(Ordering::SeqCst) != 0 {
        std::hint::spin_loop();
    }
}

struct SignalDeadline {
    policy: TimeoutPolicy,
    identity: ThreadIdentity,
    active: bool,
}

impl SignalDeadline {
    fn collect_report(&self) -> TimeoutReport {
        let fired_at = FIRED_AT.load(Ordering::Relaxed);
        let armed_at = ARMED_AT.load(Ordering::Relaxed);
        let elapsed = Duration::from_nanos(fired_at.saturating_sub(armed_at));
        let frames = SLOT
            .take(self.identity.token)
            .map(|ips| stack::resolve_frames(&ips))
            .unwrap_or_default();
        TimeoutReport::new(&self.policy, elapsed, vec![self.identity.snapshot(frames)])
    }
}

impl ActiveDeadline for SignalDeadline {
    fn disarm(&mut self) -> Option<TimeoutReport> {
        if !self.active {
            return None;
        }
        self.active = false;

        // Clearing ARMED first turns an expiry racing with us into a no-op.
        let still_armed = ARMED.swap(false, Ordering::SeqCst);
        if let Err(e) = set_countdown(Duration::ZERO) {
            log::warn!("Failed to cancel signal timer: {}", e);
        }
        drain_forwards();
        let fired = !still_armed && FIRED.swap(false, Ordering::SeqCst);
        let report = fired.then(|| self.collect_report());

        interrupt::clear();
        TARGET.store(0, Ordering::Release);
        IN_USE.store(false, Ordering::Release);

        if let Some(report) = &report {
            log::warn!(
                "Test thread {} exceeded its deadline: {}",
                self.identity.name,
                report.summary()
            );
        }
        report
    }

    fn has_fired(&self) -> bool {
        self.active && FIRED.load(Ordering::Acquire)
    }
}
