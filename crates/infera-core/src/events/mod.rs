//! Events published by the supervisors.
//!
//! Every event is an envelope `{type, source, entityId, timestamp, payload}`.
//! The transport layer subscribes through [`EventBus`] and relays envelopes to
//! remote viewers unchanged.
//!
//! # Wire Format
//!
//! ```json
//! { "type": "status", "source": "process", "entityId": "6f1c…", "timestamp": 1718000000000,
//!   "payload": { "process": { "record": { "status": "running", … } } } }
//! ```

mod bus;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{
    Artifact, DownloadRecord, LogLine, ProcessId, ProcessRecord, Progress,
};

pub use bus::{EventBus, EventFilter, Subscription};

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Snapshot delivered once to a new subscriber before any live event.
    Init,
    Status,
    Log,
    Progress,
    Complete,
    Error,
}

/// Which supervisor produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Process,
    Download,
}

/// Event body; its shape matches the record field it reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventPayload {
    /// Process snapshot: records plus recent log tail per record.
    Processes {
        processes: Vec<ProcessRecord>,
        logs: BTreeMap<ProcessId, Vec<LogLine>>,
    },
    /// Download snapshot.
    Downloads { downloads: Vec<DownloadRecord> },
    /// Full process record after a status change.
    Process { record: ProcessRecord },
    /// Full download record after a status change.
    Download { record: DownloadRecord },
    Log { line: LogLine },
    Progress { progress: Progress },
    /// Newly registered artifact.
    Complete { artifact: Artifact },
    Error { message: String },
}

/// Envelope published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source: EventSource,
    /// Id of the record the event is about; empty for list snapshots.
    pub entity_id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub payload: EventPayload,
}

impl Event {
    fn new(kind: EventKind, source: EventSource, entity_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            kind,
            source,
            entity_id: entity_id.into(),
            timestamp: now_ms(),
            payload,
        }
    }

    /// Process status change carrying the full record.
    pub fn process_status(record: &ProcessRecord) -> Self {
        Self::new(
            EventKind::Status,
            EventSource::Process,
            record.id.as_str(),
            EventPayload::Process {
                record: record.clone(),
            },
        )
    }

    /// One captured output line.
    pub fn process_log(id: &ProcessId, line: LogLine) -> Self {
        Self::new(
            EventKind::Log,
            EventSource::Process,
            id.as_str(),
            EventPayload::Log { line },
        )
    }

    /// Terminal error of a process.
    pub fn process_error(id: &ProcessId, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            EventSource::Process,
            id.as_str(),
            EventPayload::Error {
                message: message.into(),
            },
        )
    }

    /// Init snapshot for process subscribers.
    ///
    /// `entity_id` is the record id for single-entity subscriptions, empty otherwise.
    pub fn process_snapshot(
        entity_id: impl Into<String>,
        processes: Vec<ProcessRecord>,
        logs: BTreeMap<ProcessId, Vec<LogLine>>,
    ) -> Self {
        Self::new(
            EventKind::Init,
            EventSource::Process,
            entity_id,
            EventPayload::Processes { processes, logs },
        )
    }

    pub fn download_status(record: &DownloadRecord) -> Self {
        Self::new(
            EventKind::Status,
            EventSource::Download,
            record.id.as_str(),
            EventPayload::Download {
                record: record.clone(),
            },
        )
    }

    pub fn download_progress(record: &DownloadRecord) -> Self {
        Self::new(
            EventKind::Progress,
            EventSource::Download,
            record.id.as_str(),
            EventPayload::Progress {
                progress: record.progress,
            },
        )
    }

    pub fn download_complete(record: &DownloadRecord, artifact: Artifact) -> Self {
        Self::new(
            EventKind::Complete,
            EventSource::Download,
            record.id.as_str(),
            EventPayload::Complete { artifact },
        )
    }

    pub fn download_error(record: &DownloadRecord, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            EventSource::Download,
            record.id.as_str(),
            EventPayload::Error {
                message: message.into(),
            },
        )
    }

    pub fn download_snapshot(entity_id: impl Into<String>, downloads: Vec<DownloadRecord>) -> Self {
        Self::new(
            EventKind::Init,
            EventSource::Download,
            entity_id,
            EventPayload::Downloads { downloads },
        )
    }
}

/// Current time as Unix milliseconds.
fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LaunchConfig, LogStream};
    use std::path::PathBuf;

    #[test]
    fn test_status_event_serialization() {
        let record = ProcessRecord::starting("a", "tiny", PathBuf::from("/m"), LaunchConfig::default());
        let event = Event::process_status(&record);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"source\":\"process\""));
        assert!(json.contains(&format!("\"entityId\":\"{}\"", record.id)));
    }

    #[test]
    fn test_log_event_kind() {
        let id = ProcessId::from("p1");
        let event = Event::process_log(&id, LogLine::now(LogStream::Stderr, "hello"));
        assert_eq!(event.kind, EventKind::Log);
        assert_eq!(event.entity_id, "p1");
        assert!(event.timestamp > 0);
    }
}
