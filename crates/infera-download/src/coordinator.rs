//! Download coordination.
//!
//! [`DownloadCoordinator`] owns every [`DownloadRecord`]. Each transfer runs
//! as its own task driving one [`TransferStrategy`]; the task and the
//! user-facing operations mutate records only through the state mutex, and
//! every event is published while that mutex is held so per-download event
//! order matches the order of the transitions.
//!
//! A transfer that finishes while a cancel is pending is treated as
//! cancelled. Once the coordinator has started moving the staged file into
//! place the download is committed and `cancel_download` returns `false`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use infera_core::{
    ArtifactRegistryPort, DownloadError, DownloadId, DownloadRecord, DownloadSource,
    DownloadStatus, Event, EventBus, EventFilter, EventSource, InferaConfig,
    ObjectStoreCredentials, ObjectStorePort, Progress, Subscription, ValidationError,
};

use crate::filename::{destination_filename, parse_download_url};
use crate::progress::{
    DEFAULT_PROGRESS_INTERVAL, FetchToolProgressParser, ProgressParser, ProgressThrottle,
    TransferProgress,
};
use crate::strategy::{
    ObjectStoreTransfer, RepositoryTransfer, TransferContext, TransferStrategy, UrlTransfer,
    staging_path,
};

/// How long `shutdown` waits for cancelled transfers to clean up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for [`DownloadCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Repository fetch tool followed by its leading arguments.
    pub fetch_command: Vec<String>,
    pub repository_token: Option<String>,
    pub object_store_credentials: Option<ObjectStoreCredentials>,
    /// Minimum spacing between progress events of one download.
    pub progress_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(fetch_command: Vec<String>) -> Self {
        Self {
            fetch_command,
            repository_token: None,
            object_store_credentials: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Build from environment configuration.
    pub fn from_config(config: &InferaConfig) -> Self {
        let fetch_command = config
            .fetch_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self {
            repository_token: config.repository_token.clone(),
            object_store_credentials: config.object_store_credentials.clone(),
            ..Self::new(fetch_command)
        }
    }

    #[must_use]
    pub fn with_object_store_credentials(mut self, credentials: ObjectStoreCredentials) -> Self {
        self.object_store_credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_repository_token(mut self, token: impl Into<String>) -> Self {
        self.repository_token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Bookkeeping for a download that has not reached a terminal state.
struct Active {
    cancel: CancellationToken,
    throttle: ProgressThrottle,
    started: Instant,
    /// Set once the staged file is being moved into place.
    committing: bool,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
    records: IndexMap<DownloadId, DownloadRecord>,
    active: HashMap<DownloadId, Active>,
}

struct Inner {
    registry: Arc<dyn ArtifactRegistryPort>,
    bus: EventBus,
    state: Mutex<State>,
}

/// Everything needed to turn a [`DownloadSource`] into a strategy.
#[derive(Clone)]
struct Sources {
    config: CoordinatorConfig,
    http: reqwest::Client,
    object_store: Option<Arc<dyn ObjectStorePort>>,
    parser: Arc<dyn ProgressParser>,
}

impl Sources {
    fn strategy_for(&self, source: &DownloadSource) -> Result<Box<dyn TransferStrategy>, DownloadError> {
        match source {
            DownloadSource::Url { url } => Ok(Box::new(UrlTransfer::new(
                self.http.clone(),
                parse_download_url(url)?,
            ))),
            DownloadSource::ObjectStore { bucket, key } => {
                if self.config.object_store_credentials.is_none() {
                    return Err(DownloadError::MissingCredentials(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set".to_string(),
                    ));
                }
                let client = self.object_store.clone().ok_or_else(|| {
                    DownloadError::MissingCredentials("no object store client configured".to_string())
                })?;
                Ok(Box::new(ObjectStoreTransfer::new(client, bucket.clone(), key.clone())))
            }
            DownloadSource::Repository {
                repo,
                file,
                revision,
            } => Ok(Box::new(RepositoryTransfer::new(
                self.config.fetch_command.clone(),
                self.config.repository_token.clone(),
                repo.clone(),
                file.clone(),
                revision.clone(),
                Arc::clone(&self.parser),
            ))),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a record along one edge of the state machine and publish it.
    ///
    /// Terminal states drop the record's active entry.
    fn apply(
        &self,
        state: &mut State,
        id: &DownloadId,
        next: DownloadStatus,
        error: Option<String>,
    ) -> bool {
        let Some(record) = state.records.get_mut(id) else {
            return false;
        };
        let from = record.status;
        if !record.transition(next) {
            debug!(download = %id, %from, to = %next, "Ignoring disallowed transition");
            return false;
        }
        if error.is_some() {
            record.error.clone_from(&error);
        }
        self.bus.publish(Event::download_status(record));
        if let Some(message) = error {
            self.bus.publish(Event::download_error(record, message));
        }
        if next.is_terminal() {
            state.active.remove(id);
        }
        true
    }

    /// Fold one progress report into the record; publish it if the throttle allows.
    fn record_progress(&self, id: &DownloadId, update: TransferProgress) {
        let mut guard = self.lock();
        let State { records, active } = &mut *guard;
        let (Some(record), Some(active)) = (records.get_mut(id), active.get_mut(id)) else {
            return;
        };
        if record.status != DownloadStatus::Downloading {
            return;
        }
        match update {
            TransferProgress::Bytes { downloaded, total } => {
                let elapsed = active.started.elapsed().as_secs_f64();
                record.update_progress(Progress::compute(downloaded, total, elapsed));
            }
            TransferProgress::Percent(percent) => {
                let percent = percent.clamp(0.0, 100.0);
                if percent > record.progress.percent {
                    record.progress.percent = percent;
                }
            }
        }
        if active.throttle.admit(Instant::now()) {
            self.bus.publish(Event::download_progress(record));
        }
    }

    /// Drive one transfer from `pending` to a terminal state.
    async fn run(
        self: Arc<Self>,
        id: DownloadId,
        strategy: Box<dyn TransferStrategy>,
        destination: PathBuf,
        cancel: CancellationToken,
    ) {
        {
            let mut state = self.lock();
            self.apply(&mut state, &id, DownloadStatus::Downloading, None);
        }

        let progress_inner = Arc::clone(&self);
        let progress_id = id.clone();
        let ctx = TransferContext {
            staging: staging_path(&destination),
            cancel: cancel.clone(),
            progress: Arc::new(move |update: TransferProgress| progress_inner.record_progress(&progress_id, update)),
        };

        let outcome = strategy.transfer(&ctx).await;
        let outcome = match outcome {
            Ok(size) => self.begin_commit(&id, &cancel).map(|()| size),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(size) => self.commit(&id, &ctx.staging, &destination, size).await,
            Err(DownloadError::Cancelled) => {
                remove_partial(&ctx.staging).await;
                let mut state = self.lock();
                if self.apply(&mut state, &id, DownloadStatus::Cancelled, None) {
                    info!(download = %id, "Download cancelled");
                }
            }
            Err(e) => {
                remove_partial(&ctx.staging).await;
                warn!(download = %id, error = %e, "Download failed");
                let mut state = self.lock();
                self.apply(&mut state, &id, DownloadStatus::Error, Some(e.to_string()));
            }
        }
    }

    /// Decide between commit and cancel under the lock.
    ///
    /// Progress the throttle held back is published before committing so
    /// subscribers see the transferred byte count.
    fn begin_commit(&self, id: &DownloadId, cancel: &CancellationToken) -> Result<(), DownloadError> {
        let mut guard = self.lock();
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let State { records, active } = &mut *guard;
        if let Some(active) = active.get_mut(id) {
            active.committing = true;
            if active.throttle.flush() {
                if let Some(record) = records.get(id) {
                    self.bus.publish(Event::download_progress(record));
                }
            }
        }
        Ok(())
    }

    /// Move the staged file into place and register it.
    async fn commit(&self, id: &DownloadId, staging: &Path, destination: &Path, size: u64) {
        if let Err(e) = tokio::fs::rename(staging, destination).await {
            remove_partial(staging).await;
            let message = format!("failed to move download into place: {e}");
            warn!(download = %id, error = %e, "Failed to finalize download");
            let mut state = self.lock();
            self.apply(&mut state, id, DownloadStatus::Error, Some(message));
            return;
        }

        let record = self.lock().records.get(id).cloned();
        let Some(record) = record else {
            return;
        };
        match self
            .registry
            .register(&record.name, &record.filename, size, &record.source)
            .await
        {
            Ok(artifact) => {
                let mut state = self.lock();
                if let Some(record) = state.records.get_mut(id) {
                    record.artifact_id = Some(artifact.id.clone());
                    // The committed size is authoritative; estimates parsed
                    // from tool output may have overshot it.
                    record.progress = Progress {
                        downloaded: size,
                        total: size,
                        percent: 100.0,
                        eta: None,
                        ..record.progress
                    };
                }
                if self.apply(&mut state, id, DownloadStatus::Completed, None) {
                    if let Some(record) = state.records.get(id) {
                        self.bus.publish(Event::download_complete(record, artifact));
                    }
                    info!(download = %id, size, "Download completed");
                }
            }
            Err(e) => {
                remove_partial(destination).await;
                let error = DownloadError::Registry(e.to_string());
                warn!(download = %id, error = %e, "Artifact registration failed");
                let mut state = self.lock();
                self.apply(&mut state, id, DownloadStatus::Error, Some(error.to_string()));
            }
        }
    }
}

/// Best-effort delete; failures are logged, never returned.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

/// Multi-source artifact downloads with progress and cancellation.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
    sources: Sources,
}

impl DownloadCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<dyn ArtifactRegistryPort>,
        bus: EventBus,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .expect("failed to create HTTP client");
        Self {
            inner: Arc::new(Inner {
                registry,
                bus,
                state: Mutex::new(State::default()),
            }),
            sources: Sources {
                config,
                http,
                object_store: None,
                parser: Arc::new(FetchToolProgressParser::new()),
            },
        }
    }

    /// Use `client` for object-store sources.
    #[must_use]
    pub fn with_object_store(mut self, client: Arc<dyn ObjectStorePort>) -> Self {
        self.sources.object_store = Some(client);
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.sources.http = client;
        self
    }

    /// Replace the parser applied to fetch-tool output.
    #[must_use]
    pub fn with_progress_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.sources.parser = parser;
        self
    }

    /// Validate the request, create a `pending` record and start the transfer.
    ///
    /// Must be called from within a tokio runtime. Rejected requests create
    /// no record.
    pub fn start_download(
        &self,
        name: &str,
        source: DownloadSource,
    ) -> Result<DownloadRecord, DownloadError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "is required").into());
        }
        let filename = destination_filename(name, &source)?;
        let strategy = self.sources.strategy_for(&source)?;
        let destination = self.inner.registry.path(&filename);

        let mut state = self.inner.lock();
        let busy = state
            .active
            .keys()
            .filter_map(|id| state.records.get(id))
            .any(|r| r.filename == filename);
        if busy {
            return Err(DownloadError::DestinationBusy(filename));
        }

        let record = DownloadRecord::pending(name, filename, source);
        let id = record.id.clone();
        info!(
            download = %id,
            source = %record.source,
            filename = %record.filename,
            "Starting download"
        );
        self.inner.bus.publish(Event::download_status(&record));
        state.records.insert(id.clone(), record.clone());

        let cancel = CancellationToken::new();
        let throttle = ProgressThrottle::new(self.sources.config.progress_interval);
        let task = tokio::spawn(Arc::clone(&self.inner).run(
            id.clone(),
            strategy,
            destination,
            cancel.clone(),
        ));
        state.active.insert(
            id,
            Active {
                cancel,
                throttle,
                started: Instant::now(),
                committing: false,
                task: Some(task),
            },
        );
        Ok(record)
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the download was still cancellable; the record
    /// reaches `cancelled` once the transfer observes the request.
    pub fn cancel_download(&self, id: &DownloadId) -> bool {
        let state = self.inner.lock();
        let cancellable = state
            .records
            .get(id)
            .is_some_and(|r| !r.status.is_terminal());
        match state.active.get(id) {
            Some(active) if cancellable && !active.committing => {
                active.cancel.cancel();
                info!(download = %id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Records in creation order.
    pub fn list(&self) -> Vec<DownloadRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    pub fn get(&self, id: &DownloadId) -> Option<DownloadRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Forget a finished record. Active downloads are rejected.
    pub fn remove(&self, id: &DownloadId) -> Result<bool, DownloadError> {
        let mut state = self.inner.lock();
        let Some(status) = state.records.get(id).map(|r| r.status) else {
            return Ok(false);
        };
        if !status.is_terminal() {
            return Err(DownloadError::StillActive {
                id: id.to_string(),
                status: status.to_string(),
            });
        }
        state.records.shift_remove(id);
        debug!(download = %id, "Removed download record");
        Ok(true)
    }

    /// Subscribe to download events, starting with a snapshot of the
    /// matching records.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let state = self.inner.lock();
        let (entity, downloads): (String, Vec<DownloadRecord>) = match &filter {
            EventFilter::Entity(entity) => (
                entity.clone(),
                state
                    .records
                    .get(&DownloadId::from(entity.as_str()))
                    .cloned()
                    .into_iter()
                    .collect(),
            ),
            EventFilter::Source(EventSource::Process) => (String::new(), Vec::new()),
            EventFilter::All | EventFilter::Source(EventSource::Download) => {
                (String::new(), state.records.values().cloned().collect())
            }
        };
        let init = Event::download_snapshot(entity, downloads);
        self.inner.bus.subscribe_with_snapshot(filter, init)
    }

    /// Cancel every active transfer and wait for them to clean up.
    pub async fn shutdown(&self) {
        let tasks: Vec<(DownloadId, JoinHandle<()>)> = {
            let mut state = self.inner.lock();
            state
                .active
                .iter_mut()
                .filter_map(|(id, active)| {
                    active.cancel.cancel();
                    active.task.take().map(|task| (id.clone(), task))
                })
                .collect()
        };
        if tasks.is_empty() {
            return;
        }

        info!(count = tasks.len(), "Cancelling active downloads");
        let timeout = self.sources.config.shutdown_timeout;
        let results = join_all(
            tasks
                .into_iter()
                .map(|(id, task)| async move { (id, tokio::time::timeout(timeout, task).await) }),
        )
        .await;
        for (id, result) in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(download = %id, error = %e, "Download task failed"),
                Err(_) => warn!(download = %id, "Download did not stop before shutdown timeout"),
            }
        }
    }
}
