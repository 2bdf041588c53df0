//! Progress throttling.
//!
//! Each download owns one [`ProgressThrottle`]. The record is updated on
//! every observation; the throttle only decides which of those updates go
//! out as events, and remembers whether the newest one was held back so it
//! can be flushed once the transfer finishes.

use std::time::{Duration, Instant};

/// Default minimum spacing between progress events of one download.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Per-download gate for progress events.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    published_at: Option<Instant>,
    held: bool,
}

impl ProgressThrottle {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            published_at: None,
            held: false,
        }
    }

    /// Decide whether an update observed at `now` is published.
    ///
    /// A refused update is remembered until the next admitted one or a
    /// [`flush`](Self::flush).
    pub fn admit(&mut self, now: Instant) -> bool {
        let due = self
            .published_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
        if due {
            self.published_at = Some(now);
        }
        self.held = !due;
        due
    }

    /// Whether the newest update was held back; clears the flag.
    pub const fn flush(&mut self) -> bool {
        std::mem::replace(&mut self.held, false)
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}
