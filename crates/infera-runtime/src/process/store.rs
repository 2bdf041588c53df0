//! JSON file persistence for process records.
//!
//! Format: a single JSON array of records, overwritten wholesale on every
//! status change.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use infera_core::{ProcessRecord, ProcessStorePort, StoreError};
use tracing::debug;

/// File-backed [`ProcessStorePort`].
#[derive(Debug, Clone)]
pub struct JsonProcessStore {
    path: PathBuf,
}

impl JsonProcessStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ProcessStorePort for JsonProcessStore {
    fn load(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Read(format!("{}: {e}", self.path.display()))),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Read(format!("{}: {e}", self.path.display())))
    }

    /// Write atomically: temp file in the same directory, then rename.
    fn save(&self, records: &[ProcessRecord]) -> Result<(), StoreError> {
        let write = || -> io::Result<()> {
            if let Some(dir) = self.path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)?;
                }
            }
            let json = serde_json::to_vec_pretty(records).map_err(io::Error::other)?;
            let temp = self.temp_path();
            fs::write(&temp, json)?;
            fs::rename(&temp, &self.path)
        };
        write().map_err(|e| StoreError::Write(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), records = records.len(), "Persisted process records");
        Ok(())
    }
}
