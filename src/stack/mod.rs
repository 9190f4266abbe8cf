//! Stack capture for timeout reports
//!
//! Two capture paths exist. The calling thread's own stack is captured and
//! resolved directly. Any other thread is sampled by delivering a signal to it:
//! its handler records raw instruction pointers into static storage, and the
//! sampling thread resolves symbols afterwards, outside signal context.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;

#[cfg(unix)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(unix)]
pub(crate) mod sys;

#[cfg(unix)]
mod sampler;

#[cfg(target_os = "linux")]
mod linux;

/// Maximum number of frames kept per captured stack
pub const MAX_FRAMES: usize = 128;

/// Function-name prefixes of the capture machinery itself
const INTERNAL_PREFIXES: &[&str] = &[
    "backtrace::",
    "test_timeout::stack::",
    "test_timeout::timer::signal::on_alarm",
    "__restore_rt",
    "_sigtramp",
];

/// One resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub function: String,
}

impl Frame {
    fn new(function: Option<String>, file: Option<&Path>, line: Option<u32>) -> Self {
        Self {
            file: file.map(Path::to_path_buf),
            line,
            function: function.unwrap_or_else(|| "<unknown>".to_string()),
        }
    }

    fn unresolved(ip: usize) -> Self {
        Self {
            file: None,
            line: None,
            function: format!("{:#x}", ip),
        }
    }

    fn is_internal(&self) -> bool {
        INTERNAL_PREFIXES
            .iter()
            .any(|prefix| self.function.starts_with(prefix))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self
            .file
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        write!(
            f,
            "File \"{}\", line {}, in {}",
            file,
            self.line.unwrap_or(0),
            self.function
        )
    }
}

/// The stack of one thread at the moment a deadline fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub thread_name: String,
    pub thread_id: u64,
    /// Innermost frame first. Empty when the thread could not be sampled.
    pub frames: Vec<Frame>,
    /// Whether this is the thread running the timed-out test
    pub is_target: bool,
}

impl StackSnapshot {
    pub fn header(&self) -> String {
        format!("~~ Stack of {}:{} ~~", self.thread_name, self.thread_id)
    }
}

impl fmt::Display for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        if self.frames.is_empty() {
            return writeln!(f, "  <stack unavailable>");
        }
        for frame in &self.frames {
            writeln!(f, "  {}", frame)?;
        }
        Ok(())
    }
}

/// Who a stack capture is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    pub name: String,
    /// OS thread id (Linux tid, `pthread_t` elsewhere on unix)
    pub os_id: usize,
    /// `pthread_t` used to forward interrupts to this thread
    pub(crate) token: usize,
}

impl ThreadIdentity {
    pub fn current() -> Self {
        Self {
            name: current_thread_name(),
            os_id: current_os_id(),
            token: crate::interrupt::current_token(),
        }
    }

    pub(crate) fn snapshot(&self, frames: Vec<Frame>) -> StackSnapshot {
        StackSnapshot {
            thread_name: self.name.clone(),
            thread_id: self.os_id as u64,
            frames,
            is_target: true,
        }
    }
}

fn current_thread_name() -> String {
    thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

#[cfg(unix)]
fn current_os_id() -> usize {
    sys::current_os_id()
}

#[cfg(not(unix))]
fn current_os_id() -> usize {
    crate::interrupt::current_token()
}

/// Capture and resolve the calling thread's stack
pub fn capture_current() -> Vec<Frame> {
    let backtrace = backtrace::Backtrace::new();
    backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .map(|symbol| {
            Frame::new(
                symbol.name().map(|name| format!("{:#}", name)),
                symbol.filename(),
                symbol.lineno(),
            )
        })
        .filter(|frame| !frame.is_internal())
        .take(MAX_FRAMES)
        .collect()
}

/// Resolve raw instruction pointers recorded in signal context
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn resolve_frames(ips: &[usize]) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(ips.len());
    for (index, &ip) in ips.iter().enumerate() {
        // Return addresses point one past the call instruction.
        let addr = if index == 0 { ip } else { ip.saturating_sub(1) };
        let mut resolved = false;
        backtrace::resolve(addr as *mut std::ffi::c_void, |symbol| {
            resolved = true;
            frames.push(Frame::new(
                symbol.name().map(|name| format!("{:#}", name)),
                symbol.filename(),
                symbol.lineno(),
            ));
        });
        if !resolved {
            frames.push(Frame::unresolved(ip));
        }
    }
    frames.retain(|frame| !frame.is_internal());
    frames
}

/// Fixed-size frame storage written from a signal handler.
///
/// Only atomics are touched, so recording never allocates or locks.
#[cfg(unix)]
pub(crate) struct RawStackSlot {
    frames: [AtomicUsize; MAX_FRAMES],
    len: AtomicUsize,
    owner: AtomicUsize,
    ready: AtomicBool,
}

#[cfg(unix)]
impl RawStackSlot {
    pub(crate) const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            frames: [EMPTY; MAX_FRAMES],
            len: AtomicUsize::new(0),
            owner: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub(crate) fn reset(&self) {
        self.ready.store(false, Ordering::Release);
        self.len.store(0, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
    }

    /// Record the current stack on behalf of `owner`.
    ///
    /// # Safety
    /// Must run on the thread whose stack is wanted, typically inside a
    /// signal handler. Unwinding is best effort there.
    pub(crate) unsafe fn record(&self, owner: usize) {
        let mut len = 0;
        backtrace::trace_unsynchronized(|frame| {
            if len == MAX_FRAMES {
                return false;
            }
            self.frames[len].store(frame.ip() as usize, Ordering::Relaxed);
            len += 1;
            true
        });
        self.len.store(len, Ordering::Relaxed);
        self.owner.store(owner, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// The recorded pointers, if a recording for `owner` completed
    pub(crate) fn take(&self, owner: usize) -> Option<Vec<usize>> {
        if !self.ready.load(Ordering::Acquire) || self.owner.load(Ordering::Relaxed) != owner {
            return None;
        }
        let len = self.len.load(Ordering::Relaxed).min(MAX_FRAMES);
        Some(
            self.frames[..len]
                .iter()
                .map(|ip| ip.load(Ordering::Relaxed))
                .collect(),
        )
    }
}

/// Snapshot every live thread, the `target` thread first.
///
/// Threads that cannot be sampled are still listed, with no frames.
pub fn dump_threads(target: &ThreadIdentity) -> Vec<StackSnapshot> {
    let mut snapshots = platform_dump(target);
    if !snapshots.iter().any(|snapshot| snapshot.is_target) {
        snapshots.push(target.snapshot(Vec::new()));
    }
    snapshots.sort_by_key(|snapshot| !snapshot.is_target);
    snapshots
}

fn own_snapshot() -> StackSnapshot {
    StackSnapshot {
        thread_name: current_thread_name(),
        thread_id: current_os_id() as u64,
        frames: capture_current(),
        is_target: false,
    }
}

#[cfg(target_os = "linux")]
fn platform_dump(target: &ThreadIdentity) -> Vec<StackSnapshot> {
    let own = current_os_id();
    let tasks = match linux::list_threads() {
        Ok(tasks) => tasks,
        Err(e) => {
            log::warn!("Failed to enumerate threads: {}", e);
            vec![(target.os_id, target.name.clone())]
        }
    };

    tasks
        .into_iter()
        .map(|(tid, comm)| {
            if tid == own {
                own_snapshot()
            } else if tid == target.os_id {
                target.snapshot(sample(tid))
            } else {
                StackSnapshot {
                    thread_name: comm,
                    thread_id: tid as u64,
                    frames: sample(tid),
                    is_target: false,
                }
            }
        })
        .collect()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn platform_dump(target: &ThreadIdentity) -> Vec<StackSnapshot> {
    vec![target.snapshot(sample(target.os_id)), own_snapshot()]
}

#[cfg(not(unix))]
fn platform_dump(target: &ThreadIdentity) -> Vec<StackSnapshot> {
    vec![target.snapshot(Vec::new()), own_snapshot()]
}

#[cfg(unix)]
fn sample(os_id: usize) -> Vec<Frame> {
    sampler::sample(os_id)
        .map(|ips| resolve_frames(&ips))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display_format() {
        let frame = Frame {
            file: Some(PathBuf::from("src/lib.rs")),
            line: Some(42),
            function: "crate::run".to_string(),
        };
        assert_eq!(frame.to_string(), "File \"src/lib.rs\", line 42, in crate::run");

        let unknown = Frame::unresolved(0x1000);
        assert_eq!(unknown.to_string(), "File \"<unknown>\", line 0, in 0x1000");
    }

    #[test]
    fn test_capture_current_skips_capture_machinery() {
        let frames = capture_current();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|frame| !frame.function.starts_with("backtrace::")));
    }

    #[test]
    fn test_snapshot_without_frames() {
        let snapshot = ThreadIdentity::current().snapshot(Vec::new());
        let text = snapshot.to_string();
        assert!(text.starts_with("~~ Stack of "));
        assert!(text.contains("<stack unavailable>"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dump_threads_samples_other_thread() {
        use std::sync::mpsc;

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name("sampled-worker".to_string())
            .spawn(move || {
                ready_tx.send(ThreadIdentity::current()).unwrap();
                let _ = done_rx.recv();
            })
            .unwrap();

        let target = ready_rx.recv().unwrap();
        let snapshots = dump_threads(&target);
        done_tx.send(()).unwrap();
        worker.join().unwrap();

        let first = &snapshots[0];
        assert!(first.is_target);
        assert_eq!(first.thread_name, "sampled-worker");
        assert!(!first.frames.is_empty());
        assert!(snapshots.len() >= 2);
    }
}
