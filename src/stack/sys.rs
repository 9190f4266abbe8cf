//! Thin libc wrappers for signal delivery and thread identity
//!
//! Everything here except `install_handler` is async-signal-safe.

use libc::c_int;
use std::io;
use std::mem;
use std::ptr;

pub(crate) type SignalHandler = extern "C" fn(c_int);

/// Install `handler` for `signum` process-wide.
/// `SA_RESTART` keeps the interrupted thread's system calls running.
pub(crate) fn install_handler(signum: c_int, handler: SignalHandler) -> io::Result<()> {
    // SAFETY: the sigaction struct is fully initialised before use and the
    // handler is a plain `extern "C"` function.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Saves `errno` and restores it on drop, so handlers do not clobber the
/// value seen by the interrupted code.
pub(crate) struct ErrnoGuard(Option<c_int>);

impl ErrnoGuard {
    pub(crate) fn new() -> Self {
        // SAFETY: errno_location returns this thread's errno slot.
        Self(errno_location().map(|location| unsafe { *location }))
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        if let (Some(saved), Some(location)) = (self.0, errno_location()) {
            // SAFETY: as above.
            unsafe { *location = saved }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> Option<*mut c_int> {
    // SAFETY: always valid for the calling thread.
    Some(unsafe { libc::__errno_location() })
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
fn errno_location() -> Option<*mut c_int> {
    // SAFETY: always valid for the calling thread.
    Some(unsafe { libc::__error() })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd"
)))]
fn errno_location() -> Option<*mut c_int> {
    None
}

/// Monotonic clock reading in nanoseconds. Async-signal-safe.
pub(crate) fn monotonic_nanos() -> u64 {
    // SAFETY: clock_gettime writes into the provided timespec only.
    unsafe {
        let mut ts: libc::timespec = mem::zeroed();
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }
}

/// Whether the disposition of `signum` can be queried at all
pub(crate) fn can_query(signum: c_int) -> bool {
    // SAFETY: a null new action only reads the current disposition.
    unsafe {
        let mut current: libc::sigaction = mem::zeroed();
        libc::sigaction(signum, ptr::null(), &mut current) == 0
    }
}

/// OS-level identity of the calling thread, usable with [`deliver`]
#[cfg(target_os = "linux")]
pub(crate) fn current_os_id() -> usize {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as usize }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_os_id() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

/// Send `signum` to the thread identified by `os_id`
#[cfg(target_os = "linux")]
pub(crate) fn deliver(os_id: usize, signum: c_int) -> io::Result<()> {
    // SAFETY: tgkill only targets threads of our own process.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            libc::getpid(),
            os_id as libc::pid_t,
            signum,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn deliver(os_id: usize, signum: c_int) -> io::Result<()> {
    forward(os_id, signum)
}

/// Send `signum` to a thread identified by its `pthread_t`
pub(crate) fn forward(pthread: usize, signum: c_int) -> io::Result<()> {
    // SAFETY: the caller guarantees `pthread` names a live thread of this process.
    let rc = unsafe { libc::pthread_kill(pthread as libc::pthread_t, signum) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
