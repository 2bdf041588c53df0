//! Transfer strategies, one per source kind.
//!
//! Every strategy writes the artifact to [`TransferContext::staging`], reports
//! progress through the shared callback and stops at its next checkpoint once
//! the cancellation token fires. Moving the staged file into place and
//! registering it is the coordinator's job.

mod http;
mod object_store;
mod repository;
mod stream;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use infera_core::DownloadError;

use crate::progress::{ProgressCallback, TransferProgress};

pub use http::UrlTransfer;
pub use object_store::ObjectStoreTransfer;
pub use repository::RepositoryTransfer;
pub use stream::write_stream;

/// Suffix of the in-flight file next to the destination.
pub const STAGING_SUFFIX: &str = ".part";

/// Staging path for a destination (`<dest>.part`).
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Everything a strategy needs for one transfer.
pub struct TransferContext {
    /// File the strategy writes to.
    pub staging: PathBuf,
    pub cancel: CancellationToken,
    pub progress: ProgressCallback,
}

impl TransferContext {
    pub fn report(&self, progress: TransferProgress) {
        (self.progress)(progress);
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn checkpoint(&self) -> Result<(), DownloadError> {
        if self.cancel.is_cancelled() {
            Err(DownloadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Moves one artifact from its source into the staging file.
#[async_trait]
pub trait TransferStrategy: Send + Sync {
    /// Run the transfer and return the number of bytes written.
    async fn transfer(&self, ctx: &TransferContext) -> Result<u64, DownloadError>;
}
