//! Cooperative interrupt points for guarded tests
//!
//! The signal strategy cannot unwind a test from inside a signal handler.
//! Instead the handler raises a pending interrupt for the test thread, and the
//! test observes it at the next [`checkpoint`] or interruptible [`sleep`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Granularity at which [`sleep`] looks for a pending interrupt
const SLEEP_SLICE: Duration = Duration::from_millis(5);

static PENDING: AtomicBool = AtomicBool::new(false);
static TARGET: AtomicUsize = AtomicUsize::new(0);

/// Returned by a checkpoint once the test thread's deadline has fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("test interrupted by its timeout")
    }
}

impl std::error::Error for Interrupted {}

/// Fail with [`Interrupted`] if this thread's deadline has fired
pub fn checkpoint() -> Result<(), Interrupted> {
    if is_pending() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, returning early with [`Interrupted`] once the deadline fires
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        checkpoint()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Whether an interrupt is pending for the calling thread
pub fn is_pending() -> bool {
    PENDING.load(Ordering::Acquire) && TARGET.load(Ordering::Acquire) == current_token()
}

/// Select the thread future interrupts are raised for
pub(crate) fn set_target(token: usize) {
    PENDING.store(false, Ordering::Release);
    TARGET.store(token, Ordering::Release);
}

/// Raise the interrupt. Async-signal-safe.
pub(crate) fn raise() {
    PENDING.store(true, Ordering::Release);
}

pub(crate) fn clear() {
    PENDING.store(false, Ordering::Release);
    TARGET.store(0, Ordering::Release);
}

/// Identity of the calling thread as seen by the signal handler
#[cfg(unix)]
pub(crate) fn current_token() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

#[cfg(not(unix))]
pub(crate) fn current_token() -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as usize | 1
}
