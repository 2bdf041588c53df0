//! Directory-backed artifact registry.
//!
//! Artifacts are files in the models directory; the artifact id is the
//! filename. Downloads registered through [`ArtifactRegistryPort::register`]
//! are recorded with their display name and source in `artifacts.json`;
//! files copied in by hand are still found, just without that metadata.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use infera_core::{Artifact, ArtifactRegistryPort, DownloadSource, RegistryError};

/// Catalog file inside the models directory.
pub const CATALOG_FILE: &str = "artifacts.json";

pub struct DirectoryRegistry {
    root: PathBuf,
    /// Serializes catalog read-modify-write cycles.
    catalog_lock: Mutex<()>,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    fn load_catalog(&self) -> Result<Vec<Artifact>, RegistryError> {
        let path = self.catalog_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(internal(&path, &e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| internal(&path, &e))
    }

    fn save_catalog(&self, artifacts: &[Artifact]) -> Result<(), RegistryError> {
        let path = self.catalog_path();
        let tmp = self.root.join(format!("{CATALOG_FILE}.tmp"));
        let write = || -> io::Result<()> {
            fs::create_dir_all(&self.root)?;
            let json = serde_json::to_vec_pretty(artifacts).map_err(io::Error::other)?;
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| internal(&path, &e))
    }

    /// Artifact for a plain file in the models directory.
    fn untracked(&self, filename: &str) -> Option<Artifact> {
        let path = self.path(filename);
        let meta = fs::metadata(&path).ok().filter(fs::Metadata::is_file)?;
        Some(Artifact {
            id: filename.to_string(),
            name: filename.to_string(),
            filename: filename.to_string(),
            path,
            size: meta.len(),
            source: None,
        })
    }

    /// Every artifact present on disk, catalogued ones first.
    pub fn list(&self) -> Result<Vec<Artifact>, RegistryError> {
        let mut artifacts: Vec<Artifact> = self
            .load_catalog()?
            .into_iter()
            .filter(|a| a.path.is_file())
            .collect();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(internal(&self.root, &e)),
        };
        let mut untracked: Vec<Artifact> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_artifact_filename(name))
            .filter(|name| !artifacts.iter().any(|a| &a.filename == name))
            .filter_map(|name| self.untracked(&name))
            .collect();
        untracked.sort_by(|a, b| a.filename.cmp(&b.filename));
        artifacts.extend(untracked);
        Ok(artifacts)
    }
}

/// Excludes the catalog, hidden files and in-flight downloads.
fn is_artifact_filename(name: &str) -> bool {
    !name.starts_with('.')
        && !name.starts_with(CATALOG_FILE)
        && !name.ends_with(".part")
        && !name.contains(['/', '\\'])
}

fn internal(path: &Path, err: &dyn std::fmt::Display) -> RegistryError {
    RegistryError::Internal(format!("{}: {err}", path.display()))
}

#[async_trait]
impl ArtifactRegistryPort for DirectoryRegistry {
    async fn register(
        &self,
        name: &str,
        filename: &str,
        size: u64,
        source: &DownloadSource,
    ) -> Result<Artifact, RegistryError> {
        let _guard = self
            .catalog_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut catalog = self.load_catalog()?;
        catalog.retain(|a| a.filename != filename);
        let artifact = Artifact {
            id: filename.to_string(),
            name: name.to_string(),
            filename: filename.to_string(),
            path: self.path(filename),
            size,
            source: Some(source.clone()),
        };
        catalog.push(artifact.clone());
        self.save_catalog(&catalog)?;
        debug!(artifact = %artifact.id, size, "Registered artifact");
        Ok(artifact)
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    async fn find(&self, id: &str) -> Result<Option<Artifact>, RegistryError> {
        if !is_artifact_filename(id) || id == ".." {
            return Ok(None);
        }
        let catalogued = self
            .load_catalog()?
            .into_iter()
            .find(|a| a.id == id && a.path.is_file());
        Ok(catalogued.or_else(|| self.untracked(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DownloadSource {
        DownloadSource::Url {
            url: "https://h/tiny.gguf".into(),
        }
    }

    #[tokio::test]
    async fn test_register_then_find() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        fs::write(dir.path().join("tiny.gguf"), b"1234").unwrap();

        let artifact = registry
            .register("Tiny", "tiny.gguf", 4, &source())
            .await
            .unwrap();
        assert_eq!(artifact.id, "tiny.gguf");
        assert_eq!(artifact.path, dir.path().join("tiny.gguf"));

        let found = registry.find("tiny.gguf").await.unwrap().unwrap();
        assert_eq!(found.name, "Tiny");
        assert_eq!(found.source, Some(source()));

        // Re-registering replaces the entry.
        registry
            .register("Tiny v2", "tiny.gguf", 4, &source())
            .await
            .unwrap();
        let listed = registry.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Tiny v2");
    }

    #[tokio::test]
    async fn test_untracked_files_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        fs::write(dir.path().join("manual.safetensors"), b"abc").unwrap();
        fs::write(dir.path().join("partial.gguf.part"), b"x").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let found = registry.find("manual.safetensors").await.unwrap().unwrap();
        assert_eq!(found.size, 3);
        assert!(found.source.is_none());
        assert!(registry.find("partial.gguf.part").await.unwrap().is_none());
        assert!(registry.find("../etc/passwd").await.unwrap().is_none());
        assert!(registry.find("missing.gguf").await.unwrap().is_none());

        let names: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, ["manual.safetensors"]);
    }

    #[tokio::test]
    async fn test_catalog_entry_without_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        registry
            .register("Gone", "gone.gguf", 10, &source())
            .await
            .unwrap();
        assert!(registry.find("gone.gguf").await.unwrap().is_none());
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let registry = DirectoryRegistry::new("/nonexistent/infera-models");
        assert!(registry.list().unwrap().is_empty());
    }
}
