//! Timeout reports and the diagnostic stream they are written to

use crate::stack::StackSnapshot;
use crate::types::{TimeoutMethod, TimeoutPolicy};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Opening and closing line of a thread-method report
pub const REPORT_MARKER: &str = "++ Timeout ++";

/// Produced only when a deadline fired before its timer was cancelled
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutReport {
    seconds: f64,
    method: TimeoutMethod,
    elapsed: Duration,
    stacks: Vec<StackSnapshot>,
}

impl TimeoutReport {
    pub(crate) fn new(policy: &TimeoutPolicy, elapsed: Duration, stacks: Vec<StackSnapshot>) -> Self {
        Self {
            seconds: policy.seconds(),
            method: policy.method(),
            // The timer never fires early, but clock granularity can make the
            // measured value come in a hair under the configured deadline.
            elapsed: elapsed.max(policy.duration()),
            stacks,
        }
    }

    /// Configured deadline in seconds
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn method(&self) -> TimeoutMethod {
        self.method
    }

    /// Time from arming until the deadline fired
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn stacks(&self) -> &[StackSnapshot] {
        &self.stacks
    }

    /// The stack of the thread that ran the timed-out test
    pub fn target_stack(&self) -> Option<&StackSnapshot> {
        self.stacks.iter().find(|stack| stack.is_target)
    }

    /// `Timeout >{seconds}s`
    pub fn message(&self) -> String {
        format!("Timeout >{}s", self.seconds)
    }

    /// `Failed: Timeout >{seconds}s`
    pub fn summary(&self) -> String {
        format!("Failed: {}", self.message())
    }

    /// The bracketed all-threads block written by the thread method
    pub fn render_thread_dump(&self) -> String {
        let mut out = String::new();
        out.push_str(REPORT_MARKER);
        out.push('\n');
        for stack in &self.stacks {
            out.push('\n');
            out.push_str(&stack.to_string());
        }
        out.push_str(REPORT_MARKER);
        out.push('\n');
        out
    }

    /// Summary line followed by the captured stacks, as shown for a failed test
    pub fn render_failure(&self) -> String {
        let mut out = self.summary();
        out.push('\n');
        for stack in &self.stacks {
            out.push_str(&stack.to_string());
        }
        out
    }
}

impl fmt::Display for TimeoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Where thread-method reports are written as soon as they are produced
#[derive(Debug, Clone, Default)]
pub enum DiagnosticStream {
    /// The process's standard error
    #[default]
    Stderr,
    /// An in-memory buffer, for embedding hosts and tests
    Captured(Arc<Mutex<Vec<u8>>>),
}

impl DiagnosticStream {
    /// A fresh in-memory stream
    pub fn capture() -> Self {
        DiagnosticStream::Captured(Arc::new(Mutex::new(Vec::new())))
    }

    /// Write one complete block and flush it
    pub fn write_block(&self, text: &str) -> io::Result<()> {
        match self {
            DiagnosticStream::Stderr => {
                let mut stderr = io::stderr().lock();
                stderr.write_all(text.as_bytes())?;
                stderr.flush()
            }
            DiagnosticStream::Captured(buffer) => {
                let mut buffer = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                buffer.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    /// Everything written so far, for captured streams
    pub fn contents(&self) -> Option<String> {
        match self {
            DiagnosticStream::Stderr => None,
            DiagnosticStream::Captured(buffer) => {
                let buffer = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                Some(String::from_utf8_lossy(&buffer).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Frame;
    use std::path::PathBuf;

    fn sample_report() -> TimeoutReport {
        let policy = TimeoutPolicy::new(1.0, TimeoutMethod::Thread).unwrap();
        let stacks = vec![
            StackSnapshot {
                thread_name: "test_foo".to_string(),
                thread_id: 17,
                frames: vec![Frame {
                    file: Some(PathBuf::from("tests/foo.rs")),
                    line: Some(3),
                    function: "foo::test_foo".to_string(),
                }],
                is_target: true,
            },
            StackSnapshot {
                thread_name: "helper".to_string(),
                thread_id: 18,
                frames: Vec::new(),
                is_target: false,
            },
        ];
        TimeoutReport::new(&policy, Duration::from_millis(1003), stacks)
    }

    #[test]
    fn test_summary_line() {
        let report = sample_report();
        assert_eq!(report.summary(), "Failed: Timeout >1s");

        let policy = TimeoutPolicy::new(0.5, TimeoutMethod::Signal).unwrap();
        let report = TimeoutReport::new(&policy, Duration::from_millis(10), Vec::new());
        assert_eq!(report.summary(), "Failed: Timeout >0.5s");
        assert_eq!(report.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn test_thread_dump_layout() {
        let dump = sample_report().render_thread_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.first(), Some(&REPORT_MARKER));
        assert_eq!(lines.last(), Some(&REPORT_MARKER));
        assert!(lines.contains(&"~~ Stack of test_foo:17 ~~"));
        assert!(lines.contains(&"~~ Stack of helper:18 ~~"));
        assert!(lines.contains(&"  File \"tests/foo.rs\", line 3, in foo::test_foo"));
    }

    #[test]
    fn test_captured_stream_accumulates() {
        let stream = DiagnosticStream::capture();
        stream.write_block("one\n").unwrap();
        stream.clone().write_block("two\n").unwrap();
        assert_eq!(stream.contents().as_deref(), Some("one\ntwo\n"));
        assert_eq!(DiagnosticStream::Stderr.contents(), None);
    }
}
