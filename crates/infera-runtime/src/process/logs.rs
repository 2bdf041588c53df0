//! Bounded per-process log history.

use std::collections::VecDeque;

use infera_core::LogLine;

/// Maximum number of log lines kept per process.
pub const MAX_LOG_LINES: usize = 5000;

/// Ring buffer storing recent log lines for a process.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }

    /// Buffer that keeps at most `capacity` lines (minimum one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Add a line, removing the oldest if at capacity.
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// The most recent `n` lines in arrival order.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    /// Last stderr line, used to explain abnormal exits.
    pub fn last_stderr(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find(|l| l.stream == infera_core::LogStream::Stderr && !l.line.trim().is_empty())
            .map(|l| l.line.as_str())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
