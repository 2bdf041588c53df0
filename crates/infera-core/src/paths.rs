//! Data directory resolution.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "INFERA_DATA_DIR";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("cannot determine system data directory")]
    NoDataDir,
    #[error("failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Root directory for application data (models, process state).
///
/// Resolution order:
/// 1. `override_dir` (normally `INFERA_DATA_DIR`)
/// 2. System data directory (e.g. `~/.local/share/infera`)
pub fn data_root(override_dir: Option<&str>) -> Result<PathBuf, PathError> {
    if let Some(dir) = override_dir.filter(|d| !d.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_local_dir()
        .map(|d| d.join("infera"))
        .ok_or(PathError::NoDataDir)
}

/// Create `path` (and parents) if it does not exist yet.
pub fn ensure_directory(path: &Path) -> Result<(), PathError> {
    std::fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        assert_eq!(
            data_root(Some("/tmp/infera-test")).unwrap(),
            PathBuf::from("/tmp/infera-test")
        );
    }

    #[test]
    fn test_blank_override_is_ignored() {
        if let Ok(root) = data_root(Some("  ")) {
            assert!(root.ends_with("infera"));
        }
    }
}
