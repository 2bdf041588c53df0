//! Progress reporting, throttling and fetch-tool output parsing.

mod parser;
mod throttle;

use std::sync::Arc;

pub use parser::{FetchToolProgressParser, ParsedProgress, ProgressParser};
pub use throttle::{DEFAULT_PROGRESS_INTERVAL, ProgressThrottle};

/// One progress observation from a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferProgress {
    /// Byte counts; `total` is 0 when unknown.
    Bytes { downloaded: u64, total: u64 },
    /// Only a completion percentage is known.
    Percent(f64),
}

/// Callback invoked by transfers on every observation.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;
