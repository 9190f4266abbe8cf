//! Cross-thread stack sampling through `SIGURG`
//!
//! `SIGURG` is ignored by default, so a stray delivery after a sample gave up
//! waiting is harmless. One sample is in flight at a time.

use super::sys;
use super::RawStackSlot;
use libc::c_int;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_SIGNAL: c_int = libc::SIGURG;

/// How long a sampled thread gets to run its handler
const SAMPLE_WAIT: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

static SLOT: RawStackSlot = RawStackSlot::new();
static TARGET: AtomicUsize = AtomicUsize::new(0);
static SAMPLER: Mutex<()> = Mutex::new(());

static INSTALLED: Lazy<bool> = Lazy::new(|| match sys::install_handler(SAMPLE_SIGNAL, on_sample) {
    Ok(()) => true,
    Err(e) => {
        log::warn!("Failed to install stack sampling handler: {}", e);
        false
    }
});

extern "C" fn on_sample(_signum: c_int) {
    let _errno = sys::ErrnoGuard::new();
    let me = sys::current_os_id();
    if TARGET.load(Ordering::Acquire) != me {
        return;
    }
    // SAFETY: we are on the thread being sampled.
    unsafe { SLOT.record(me) }
}

/// Raw instruction pointers of the thread `os_id`, or `None` if it did not answer
pub(super) fn sample(os_id: usize) -> Option<Vec<usize>> {
    if !*INSTALLED {
        return None;
    }
    let _guard = SAMPLER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    SLOT.reset();
    TARGET.store(os_id, Ordering::Release);
    let result = match sys::deliver(os_id, SAMPLE_SIGNAL) {
        Ok(()) => wait_for(os_id),
        Err(e) => {
            log::debug!("Could not signal thread {} for sampling: {}", os_id, e);
            None
        }
    };
    TARGET.store(0, Ordering::Release);

    if result.is_none() {
        log::debug!("Thread {} did not answer the stack sample", os_id);
    }
    result
}

fn wait_for(os_id: usize) -> Option<Vec<usize>> {
    let deadline = Instant::now() + SAMPLE_WAIT;
    loop {
        if let Some(ips) = SLOT.take(os_id) {
            return Some(ips);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
