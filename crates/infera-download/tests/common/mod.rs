//! Shared fixtures for download coordinator tests.
//!
//! URL transfers hit a throwaway HTTP server on a loopback listener; object
//! stores and registries are in-memory fakes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::mock;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use infera_core::{
    Artifact, ArtifactRegistryPort, ByteStream, DownloadId, DownloadRecord, DownloadSource,
    DownloadStatus, EventBus, ObjectStoreCredentials, ObjectStoreError, ObjectStorePort,
    RegistryError,
};
use infera_download::{CoordinatorConfig, DownloadCoordinator};

/// Registry that stores artifacts under a temp directory.
pub struct DirRegistry {
    root: PathBuf,
    pub registered: Mutex<Vec<Artifact>>,
}

impl DirRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            registered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ArtifactRegistryPort for DirRegistry {
    async fn register(
        &self,
        name: &str,
        filename: &str,
        size: u64,
        source: &DownloadSource,
    ) -> Result<Artifact, RegistryError> {
        let artifact = Artifact {
            id: format!("artifact-{filename}"),
            name: name.to_string(),
            filename: filename.to_string(),
            path: self.path(filename),
            size,
            source: Some(source.clone()),
        };
        self.registered.lock().unwrap().push(artifact.clone());
        Ok(artifact)
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    async fn find(&self, id: &str) -> Result<Option<Artifact>, RegistryError> {
        Ok(self
            .registered
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }
}

mock! {
    pub Registry {}

    #[async_trait]
    impl ArtifactRegistryPort for Registry {
        async fn register(
            &self,
            name: &str,
            filename: &str,
            size: u64,
            source: &DownloadSource,
        ) -> Result<Artifact, RegistryError>;

        fn path(&self, filename: &str) -> PathBuf;

        async fn find(&self, id: &str) -> Result<Option<Artifact>, RegistryError>;
    }
}

/// In-memory object store serving fixed objects in small chunks.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: HashMap<(String, String), Vec<u8>>,
}

impl FakeObjectStore {
    pub fn with_object(mut self, bucket: &str, key: &str, body: &[u8]) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        self
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&Vec<u8>, ObjectStoreError> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStorePort for FakeObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64, ObjectStoreError> {
        Ok(self.object(bucket, key)?.len() as u64)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, ObjectStoreError> {
        let chunks: Vec<Result<Bytes, ObjectStoreError>> = self
            .object(bucket, key)?
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

pub fn test_credentials() -> ObjectStoreCredentials {
    ObjectStoreCredentials {
        access_key_id: "AKIATEST".to_string(),
        secret_access_key: "secret".to_string(),
    }
}

/// What the test HTTP server answers with.
#[derive(Clone)]
pub enum Reply {
    /// `200` with the full body.
    Body(Vec<u8>),
    /// Bare status line with an empty body.
    Status(u16),
    /// Announce `declared` bytes, send `sent`, then hang.
    Stall { declared: usize, sent: Vec<u8> },
}

/// Loopback HTTP/1.1 server answering every request with the same reply.
pub struct TestServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let reply = reply.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    match reply {
                        Reply::Body(body) => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let _ = socket.write_all(&body).await;
                        }
                        Reply::Status(code) => {
                            let head = format!(
                                "HTTP/1.1 {code} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                        }
                        Reply::Stall { declared, sent } => {
                            let head = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
                            );
                            let _ = socket.write_all(head.as_bytes()).await;
                            let _ = socket.write_all(&sent).await;
                            let _ = socket.flush().await;
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });
        Self { addr, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A coordinator storing artifacts in a temp directory.
pub struct Harness {
    pub dir: TempDir,
    pub coordinator: DownloadCoordinator,
    pub registry: Arc<DirRegistry>,
    pub bus: EventBus,
}

pub struct HarnessBuilder {
    config: CoordinatorConfig,
    object_store: Option<Arc<dyn ObjectStorePort>>,
    registry: Option<Arc<dyn ArtifactRegistryPort>>,
    dir: Option<TempDir>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::new(vec!["false".to_string()]),
            object_store: None,
            registry: None,
            dir: None,
        }
    }

    pub fn config(mut self, f: impl FnOnce(CoordinatorConfig) -> CoordinatorConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn object_store(mut self, store: impl ObjectStorePort + 'static) -> Self {
        self.object_store = Some(Arc::new(store));
        self
    }

    /// Use `registry` instead of a [`DirRegistry`], storing into `dir`.
    pub fn registry(mut self, dir: TempDir, registry: Arc<dyn ArtifactRegistryPort>) -> Self {
        self.dir = Some(dir);
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Harness {
        let dir = self.dir.unwrap_or_else(|| TempDir::new().unwrap());
        let dir_registry = Arc::new(DirRegistry::new(dir.path()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::clone(&dir_registry) as Arc<dyn ArtifactRegistryPort>);
        let bus = EventBus::new();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let mut coordinator =
            DownloadCoordinator::new(self.config, registry, bus.clone()).with_http_client(http);
        if let Some(store) = self.object_store {
            coordinator = coordinator.with_object_store(store);
        }
        Harness {
            dir,
            coordinator,
            registry: dir_registry,
            bus,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until the record reaches `status` or the deadline passes.
pub async fn wait_for_status(
    coordinator: &DownloadCoordinator,
    id: &DownloadId,
    status: DownloadStatus,
) -> DownloadRecord {
    wait_for(coordinator, id, |r| r.status == status).await
}

/// Poll until `done` holds for the record or the deadline passes.
pub async fn wait_for(
    coordinator: &DownloadCoordinator,
    id: &DownloadId,
    done: impl Fn(&DownloadRecord) -> bool,
) -> DownloadRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = coordinator.get(id).expect("record exists");
        if done(&record) {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out, record is {} ({:?})",
            record.status,
            record.error
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Path of the staging file for `filename` under `dir`.
pub fn partial_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.part"))
}
