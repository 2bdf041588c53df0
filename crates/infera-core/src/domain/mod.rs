//! Domain types shared by the supervisors.

mod artifact;
mod download;
mod launch;
mod process;

pub use artifact::Artifact;
pub use download::{DownloadId, DownloadRecord, DownloadSource, DownloadStatus, Progress};
pub use launch::{
    DEFAULT_DTYPE, DEFAULT_GPU_MEMORY_UTILIZATION, LaunchConfig, LaunchOverrides, SUPPORTED_DTYPES,
};
pub use process::{LogLine, LogStream, ProcessId, ProcessRecord, ProcessStatus};
