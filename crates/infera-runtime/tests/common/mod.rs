//! Shared fixtures for supervisor integration tests.
//!
//! Fake servers are small shell scripts run through `sh`, so nothing has to
//! be made executable. Each test uses its own port range.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use infera_core::{
    Artifact, ArtifactRegistryPort, DownloadSource, EventBus, NoopProcessStore, ProcessId,
    ProcessRecord, ProcessStatus, ProcessStorePort, RegistryError,
};
use infera_runtime::{PortAllocator, ProcessSupervisor, SupervisorConfig};

/// Prints the readiness marker, then sleeps until signalled.
pub const READY_SERVER: &str = r#"
echo "INFO:     Started server process"
echo "INFO:     Application startup complete."
exec sleep 30
"#;

/// Ready, but ignores SIGTERM.
pub const STUBBORN_SERVER: &str = r#"
trap '' TERM
echo "Application startup complete"
while true; do sleep 0.1; done
"#;

/// Fails immediately with a message on stderr.
pub const CRASHING_SERVER: &str = r#"
echo "loading weights"
echo "RuntimeError: CUDA out of memory" >&2
exit 3
"#;

/// Becomes ready, then dies on its own after the grace window.
pub const DYING_SERVER: &str = r#"
echo "Application startup complete"
sleep 1
echo "Segmentation fault" >&2
exit 7
"#;

/// Exits cleanly without ever becoming ready.
pub const QUITTING_SERVER: &str = "exit 0\n";

/// Never prints the readiness marker.
pub const SILENT_SERVER: &str = "exec sleep 30\n";

pub const ARTIFACT_ID: &str = "tiny-model";

/// In-memory artifact registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    root: PathBuf,
    artifacts: Mutex<HashMap<String, Artifact>>,
}

impl InMemoryRegistry {
    pub fn with_artifact(root: &Path, id: &str) -> Self {
        let registry = Self {
            root: root.to_path_buf(),
            artifacts: Mutex::new(HashMap::new()),
        };
        registry.artifacts.lock().unwrap().insert(
            id.to_string(),
            Artifact {
                id: id.to_string(),
                name: "Tiny Model".to_string(),
                filename: format!("{id}.gguf"),
                path: root.join(format!("{id}.gguf")),
                size: 4,
                source: None,
            },
        );
        registry
    }
}

#[async_trait]
impl ArtifactRegistryPort for InMemoryRegistry {
    async fn register(
        &self,
        name: &str,
        filename: &str,
        size: u64,
        source: &DownloadSource,
    ) -> Result<Artifact, RegistryError> {
        let artifact = Artifact {
            id: filename.to_string(),
            name: name.to_string(),
            filename: filename.to_string(),
            path: self.path(filename),
            size,
            source: Some(source.clone()),
        };
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact.id.clone(), artifact.clone());
        Ok(artifact)
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    async fn find(&self, id: &str) -> Result<Option<Artifact>, RegistryError> {
        Ok(self.artifacts.lock().unwrap().get(id).cloned())
    }
}

/// A supervisor wired to a fake server script.
pub struct Harness {
    pub dir: TempDir,
    pub supervisor: ProcessSupervisor,
    pub ports: Arc<PortAllocator>,
    pub bus: EventBus,
}

pub struct HarnessBuilder {
    script: String,
    command: Option<Vec<String>>,
    ports: (u16, u16),
    stop_timeout: Duration,
    store: Option<Arc<dyn ProcessStorePort>>,
}

impl HarnessBuilder {
    pub fn new(script: &str, ports: (u16, u16)) -> Self {
        Self {
            script: script.to_string(),
            command: None,
            ports,
            stop_timeout: Duration::from_secs(2),
            store: None,
        }
    }

    /// Run this command instead of the script.
    pub fn command(mut self, command: &[&str]) -> Self {
        self.command = Some(command.iter().map(|s| (*s).to_string()).collect());
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn store(mut self, store: Arc<dyn ProcessStorePort>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("server.sh");
        std::fs::write(&script, &self.script).unwrap();

        let command = self
            .command
            .unwrap_or_else(|| vec!["sh".to_string(), script.display().to_string()]);
        let config = SupervisorConfig::new(command)
            .with_spawn_grace(Duration::from_millis(300))
            .with_stop_timeout(self.stop_timeout);

        let ports = Arc::new(PortAllocator::new(self.ports.0, self.ports.1));
        let bus = EventBus::new();
        let registry = Arc::new(InMemoryRegistry::with_artifact(dir.path(), ARTIFACT_ID));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(NoopProcessStore) as Arc<dyn ProcessStorePort>);
        let supervisor =
            ProcessSupervisor::new(config, Arc::clone(&ports), registry, store, bus.clone());

        Harness {
            dir,
            supervisor,
            ports,
            bus,
        }
    }
}

/// Poll until the record reaches `status` or the deadline passes.
pub async fn wait_for_status(
    supervisor: &ProcessSupervisor,
    id: &ProcessId,
    status: ProcessStatus,
) -> ProcessRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = supervisor.get(id).expect("record exists");
        if record.status == status {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status}, record is {}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
