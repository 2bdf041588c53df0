#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod paths;
pub mod ports;

// Re-export commonly used types for convenience
pub use config::{InferaConfig, ObjectStoreCredentials};
pub use domain::{
    Artifact, DownloadId, DownloadRecord, DownloadSource, DownloadStatus, LaunchConfig,
    LaunchOverrides, LogLine, LogStream, ProcessId, ProcessRecord, ProcessStatus, Progress,
};
pub use error::{DownloadError, PortError, ProcessError, ValidationError};
pub use events::{Event, EventBus, EventFilter, EventKind, EventPayload, EventSource, Subscription};
pub use ports::{
    ArtifactRegistryPort, ByteStream, NoopProcessStore, ObjectStoreError, ObjectStorePort,
    ProcessStorePort, RegistryError, StoreError,
};
