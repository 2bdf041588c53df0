//! Artifacts tracked by the external registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::download::DownloadSource;

/// A model file known to the artifact registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    /// Display name.
    pub name: String,
    pub filename: String,
    /// Resolved location on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
}
