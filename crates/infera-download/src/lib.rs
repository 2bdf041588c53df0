#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod coordinator;
pub mod filename;
pub mod progress;
pub mod strategy;

pub use coordinator::{CoordinatorConfig, DEFAULT_SHUTDOWN_TIMEOUT, DownloadCoordinator};
pub use filename::{destination_filename, parse_download_url, slugify};
pub use progress::{
    DEFAULT_PROGRESS_INTERVAL, FetchToolProgressParser, ParsedProgress, ProgressCallback,
    ProgressParser, ProgressThrottle, TransferProgress,
};
pub use strategy::{TransferContext, TransferStrategy};
