//! Download records, sources and progress.
//!
//! Pure data types with no I/O dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Opaque identifier of a download record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    /// Mint a new random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where an artifact is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadSource {
    /// Plain HTTP(S) URL.
    Url { url: String },
    /// Object-store bucket and key.
    ObjectStore { bucket: String, key: String },
    /// Model-repository reference fetched by the external fetch tool.
    Repository {
        repo: String,
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
}

impl DownloadSource {
    /// Check required fields are present and non-empty.
    ///
    /// URL scheme checks are done by the download crate, which owns URL parsing.
    pub fn validate_fields(&self) -> Result<(), ValidationError> {
        let required: &[(&str, &str)] = match self {
            Self::Url { url } => &[("url", url)],
            Self::ObjectStore { bucket, key } => &[("bucket", bucket), ("key", key)],
            Self::Repository { repo, file, .. } => &[("repo", repo), ("file", file)],
        };
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::new(*field, "is required"));
            }
        }
        if let Self::Repository {
            revision: Some(rev),
            ..
        } = self
            && rev.trim().is_empty()
        {
            return Err(ValidationError::new("revision", "must not be empty"));
        }
        Ok(())
    }

    /// Short label for logs (`url`, `object_store`, `repository`).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::ObjectStore { .. } => "object_store",
            Self::Repository { .. } => "repository",
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url } => f.write_str(url),
            Self::ObjectStore { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            Self::Repository {
                repo,
                file,
                revision,
            } => match revision {
                Some(rev) => write!(f, "{repo}@{rev}/{file}"),
                None => write!(f, "{repo}/{file}"),
            },
        }
    }
}

/// Lifecycle status of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Record created, transfer not yet dispatched.
    Pending,
    /// Bytes are moving.
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Downloading)
                | (Self::Downloading, Self::Completed | Self::Error | Self::Cancelled)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer progress snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub downloaded: u64,
    /// Total bytes; `0` when unknown.
    pub total: u64,
    /// 0.0-100.0; `0.0` when the total is unknown.
    pub percent: f64,
    /// Bytes per second since the transfer started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Seconds remaining at the current speed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
}

impl Progress {
    /// Derive percent, speed and ETA from raw byte counts.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(downloaded: u64, total: u64, elapsed_secs: f64) -> Self {
        let percent = if total > 0 {
            (downloaded as f64 / total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let speed = (elapsed_secs > 0.0 && downloaded > 0).then(|| downloaded as f64 / elapsed_secs);
        let eta = match speed {
            Some(bps) if total > 0 && bps > 0.0 => {
                Some(total.saturating_sub(downloaded) as f64 / bps)
            }
            _ => None,
        };
        Self {
            downloaded,
            total,
            percent,
            speed,
            eta,
        }
    }
}

/// State of one artifact transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: DownloadId,
    /// Display name.
    pub name: String,
    /// Destination filename inside the artifact storage root.
    pub filename: String,
    pub source: DownloadSource,
    pub status: DownloadStatus,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Registry id of the artifact, set once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
}

impl DownloadRecord {
    /// Create a record in the `pending` state.
    pub fn pending(name: impl Into<String>, filename: impl Into<String>, source: DownloadSource) -> Self {
        Self {
            id: DownloadId::new(),
            name: name.into(),
            filename: filename.into(),
            source,
            status: DownloadStatus::Pending,
            progress: Progress::default(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            artifact_id: None,
        }
    }

    /// Apply a status change along a valid edge; stamps `completed_at` on terminal states.
    pub fn transition(&mut self, next: DownloadStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Record new progress, never letting `downloaded` go backwards.
    pub fn update_progress(&mut self, progress: Progress) {
        if progress.downloaded < self.progress.downloaded {
            return;
        }
        self.progress = progress;
    }
}
