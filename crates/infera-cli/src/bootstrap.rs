//! CLI bootstrap - the composition root.
//!
//! This is the only place where concrete adapters are chosen: the JSON
//! process store, the directory artifact registry and the shared event bus.
//! Handlers receive a [`CliContext`] and build supervisors from it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use infera_core::paths::ensure_directory;
use infera_core::{ArtifactRegistryPort, EventBus, InferaConfig, ProcessStorePort};
use infera_download::{CoordinatorConfig, DownloadCoordinator};
use infera_runtime::{JsonProcessStore, PortAllocator, ProcessSupervisor, SupervisorConfig};

use crate::registry::DirectoryRegistry;

/// Fully composed dependencies for one CLI invocation.
pub struct CliContext {
    pub config: InferaConfig,
    pub bus: EventBus,
    pub registry: Arc<DirectoryRegistry>,
    pub store: Arc<JsonProcessStore>,
}

/// Build the context, creating the models and state directories.
pub fn bootstrap(config: InferaConfig) -> Result<CliContext> {
    ensure_directory(&config.models_dir)
        .with_context(|| format!("models directory {}", config.models_dir.display()))?;
    if let Some(parent) = config.state_file.parent() {
        ensure_directory(parent)
            .with_context(|| format!("state directory {}", parent.display()))?;
    }
    debug!(
        models_dir = %config.models_dir.display(),
        state_file = %config.state_file.display(),
        "Bootstrapped CLI context"
    );

    Ok(CliContext {
        registry: Arc::new(DirectoryRegistry::new(&config.models_dir)),
        store: Arc::new(JsonProcessStore::new(&config.state_file)),
        bus: EventBus::new(),
        config,
    })
}

impl CliContext {
    /// Process supervisor over the persisted state file.
    ///
    /// Not initialized; callers that own the state call
    /// [`ProcessSupervisor::initialize`] themselves.
    pub fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(
            SupervisorConfig::from_config(&self.config),
            Arc::new(PortAllocator::new(self.config.port_base, self.config.port_max)),
            Arc::clone(&self.registry) as Arc<dyn ArtifactRegistryPort>,
            Arc::clone(&self.store) as Arc<dyn ProcessStorePort>,
            self.bus.clone(),
        )
    }

    /// Download coordinator writing into the models directory.
    ///
    /// No object-store client is wired in; object-store downloads fail with
    /// a missing-credentials error until one is.
    pub fn coordinator(&self) -> DownloadCoordinator {
        DownloadCoordinator::new(
            CoordinatorConfig::from_config(&self.config),
            Arc::clone(&self.registry) as Arc<dyn ArtifactRegistryPort>,
            self.bus.clone(),
        )
    }

    /// Directory holding mirrored process output.
    pub fn logs_dir(&self) -> PathBuf {
        self.config
            .state_file
            .parent()
            .map_or_else(|| PathBuf::from("logs"), |dir| dir.join("logs"))
    }

    /// Mirrored output file of one process.
    pub fn log_file(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{id}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(root: &std::path::Path) -> InferaConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("INFERA_DATA_DIR", root.display().to_string()),
            ("INFERA_SERVER_CMD", "true".to_string()),
        ]);
        InferaConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_bootstrap_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = bootstrap(config(dir.path())).unwrap();
        assert!(dir.path().join("models").is_dir());
        assert_eq!(ctx.registry.root(), dir.path().join("models"));
        assert_eq!(ctx.store.path(), dir.path().join("processes.json"));
        assert_eq!(ctx.logs_dir(), dir.path().join("logs"));
        assert_eq!(ctx.log_file("abc"), dir.path().join("logs").join("abc.log"));
    }

    #[tokio::test]
    async fn test_supervisor_and_coordinator_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = bootstrap(config(dir.path())).unwrap();
        let supervisor = ctx.supervisor();
        assert_eq!(supervisor.initialize().unwrap(), 0);
        assert!(supervisor.list().is_empty());
        assert!(ctx.coordinator().list().is_empty());
    }
}
