//! Process records and their lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::launch::LaunchConfig;

/// Opaque identifier of a supervised process record.
///
/// A fresh id is minted for every spawn, including restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Mint a new random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a supervised process.
///
/// ```text
/// starting ──► running ──► stopping ──► stopped
///    │  │         │  │         │
///    │  └─────────┼──┼─────────┴──► error
///    └──► stopping  └──► stopped (clean exit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Spawned, waiting for the readiness marker.
    Starting,
    /// Readiness marker seen; accepting requests.
    Running,
    /// Termination requested, waiting for the child to exit.
    Stopping,
    /// Exited cleanly or after a requested stop.
    Stopped,
    /// Failed to spawn or exited abnormally.
    Error,
}

impl ProcessStatus {
    /// `stopped` and `error` have no outgoing edges.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether the record still owns a child process (or may own one).
    #[must_use]
    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Check whether moving from `self` to `next` follows an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running | Self::Stopping | Self::Error)
                | (Self::Running, Self::Stopping | Self::Stopped | Self::Error)
                | (Self::Stopping, Self::Stopped | Self::Error)
        )
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory and durable state of one supervised server process.
///
/// The OS child handle is deliberately absent: it lives only inside the
/// supervisor and can never be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub id: ProcessId,
    /// Registry id of the artifact being served.
    pub artifact_id: String,
    /// Display name of the artifact.
    pub name: String,
    /// Resolved path of the artifact on disk.
    pub model_path: PathBuf,
    pub port: u16,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Last error message; retained until the record is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full effective launch configuration.
    pub config: LaunchConfig,
}

impl ProcessRecord {
    /// Create a record in the initial `starting` state.
    pub fn starting(
        artifact_id: impl Into<String>,
        name: impl Into<String>,
        model_path: PathBuf,
        config: LaunchConfig,
    ) -> Self {
        Self {
            id: ProcessId::new(),
            artifact_id: artifact_id.into(),
            name: name.into(),
            model_path,
            port: config.port,
            status: ProcessStatus::Starting,
            pid: None,
            started_at: Some(Utc::now()),
            stopped_at: None,
            error: None,
            config,
        }
    }

    /// Apply a status change, stamping `stopped_at` on terminal states.
    ///
    /// Returns `false` (leaving the record untouched) if the edge is not part
    /// of the state machine.
    pub fn transition(&mut self, next: ProcessStatus, error: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.stopped_at = Some(Utc::now());
        }
        if error.is_some() {
            self.error = error;
        }
        true
    }
}

/// Which output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// A single captured line of subprocess output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

impl LogLine {
    /// Create a log line stamped with the current time.
    pub fn now(stream: LogStream, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            line: line.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.stream.as_str(),
            self.line
        )
    }
}
