//! Artifact registry port.
//!
//! The registry is a persisted catalog of model files owned by another part of
//! the system. The download coordinator registers finished transfers with it
//! and the process supervisor resolves artifact ids through it.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{Artifact, DownloadSource};

/// Errors surfaced by a registry implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("registry failure: {0}")]
    Internal(String),
}

/// Port for the external artifact registry.
#[async_trait]
pub trait ArtifactRegistryPort: Send + Sync {
    /// Record a finished download and return the new artifact.
    async fn register(
        &self,
        name: &str,
        filename: &str,
        size: u64,
        source: &DownloadSource,
    ) -> Result<Artifact, RegistryError>;

    /// Canonical on-disk location for `filename`.
    fn path(&self, filename: &str) -> PathBuf;

    /// Look up an artifact by id.
    async fn find(&self, id: &str) -> Result<Option<Artifact>, RegistryError>;
}
