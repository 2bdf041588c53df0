//! Inference-server process supervision.
//!
//! [`ProcessSupervisor`] owns every [`ProcessRecord`], its log buffer and the
//! OS child behind it. All record mutation goes through one state mutex, and
//! status events are published and the record set persisted while that mutex
//! is held, so subscribers see transitions in the order they happened and a
//! snapshot taken under the same lock can never miss or duplicate one.
//!
//! Each child is owned by a monitor task which reaps it and applies the exit
//! transition. `kill` talks to that task through a oneshot (force kill) and
//! waits on a watch channel (exit observed).

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use indexmap::IndexMap;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use infera_core::{
    ArtifactRegistryPort, Event, EventBus, EventFilter, EventSource, InferaConfig, LaunchConfig,
    LaunchOverrides, LogLine, LogStream, ProcessError, ProcessId, ProcessRecord, ProcessStatus,
    ProcessStorePort, Subscription,
};

use super::args::build_launch_args;
use super::health::check_http_health;
use super::logs::{LogBuffer, MAX_LOG_LINES};
use super::ports::{PortAllocator, is_port_bindable};
use super::shutdown::{describe_exit, send_terminate};
use super::stream::spawn_stream_reader;

/// Output substring taken as proof the server accepts requests.
pub const DEFAULT_READY_MARKER: &str = "Application startup complete";

/// Window after spawn in which failures are reported to the caller.
pub const DEFAULT_SPAWN_GRACE: Duration = Duration::from_millis(1500);

/// Time a child gets to honour SIGTERM before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Log lines per record included in subscription snapshots.
pub const DEFAULT_SNAPSHOT_LOG_TAIL: usize = 100;

/// Upper bound on waiting for output readers after the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on waiting for exit after an unconditional kill.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

/// Tunables for [`ProcessSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable followed by its leading arguments.
    pub command: Vec<String>,
    pub host: String,
    /// Launch configuration overrides are merged onto.
    pub defaults: LaunchConfig,
    pub ready_marker: String,
    pub spawn_grace: Duration,
    pub stop_timeout: Duration,
    pub health_timeout: Duration,
    pub snapshot_log_tail: usize,
    pub log_capacity: usize,
}

impl SupervisorConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            host: infera_core::config::DEFAULT_HOST.to_string(),
            defaults: LaunchConfig::default(),
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            spawn_grace: DEFAULT_SPAWN_GRACE,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            snapshot_log_tail: DEFAULT_SNAPSHOT_LOG_TAIL,
            log_capacity: MAX_LOG_LINES,
        }
    }

    /// Build from environment configuration.
    pub fn from_config(config: &InferaConfig) -> Self {
        Self::new(config.server_command.clone()).with_host(config.host.clone())
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: LaunchConfig) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    #[must_use]
    pub const fn with_spawn_grace(mut self, grace: Duration) -> Self {
        self.spawn_grace = grace;
        self
    }

    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_snapshot_log_tail(mut self, lines: usize) -> Self {
        self.snapshot_log_tail = lines;
        self
    }
}

/// Supervisor-side handle on a live child.
struct ChildHandle {
    pid: Option<u32>,
    force_kill: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct State {
    records: IndexMap<ProcessId, ProcessRecord>,
    logs: HashMap<ProcessId, LogBuffer>,
    children: HashMap<ProcessId, ChildHandle>,
}

struct Inner {
    config: SupervisorConfig,
    ports: Arc<PortAllocator>,
    registry: Arc<dyn ArtifactRegistryPort>,
    store: Arc<dyn ProcessStorePort>,
    bus: EventBus,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &State) {
        let records: Vec<ProcessRecord> = state.records.values().cloned().collect();
        if let Err(e) = self.store.save(&records) {
            warn!(error = %e, "Failed to persist process records");
        }
    }

    /// Publish a record that was just created or otherwise changed.
    fn announce(&self, state: &State, id: &ProcessId) {
        self.persist(state);
        if let Some(record) = state.records.get(id) {
            self.bus.publish(Event::process_status(record));
        }
    }

    /// Move a record along one edge of the state machine.
    ///
    /// Terminal states release the port. Returns `false` if the edge is not
    /// allowed from the current status.
    fn apply(
        &self,
        state: &mut State,
        id: &ProcessId,
        next: ProcessStatus,
        error: Option<String>,
    ) -> bool {
        let Some(record) = state.records.get_mut(id) else {
            return false;
        };
        let from = record.status;
        if !record.transition(next, error.clone()) {
            debug!(process = %id, %from, to = %next, "Ignoring disallowed transition");
            return false;
        }
        if next.is_terminal() {
            self.ports.release(record.port);
            state.children.remove(id);
        }
        info!(process = %id, %from, to = %next, "Process status changed");
        self.announce(state, id);
        if let (ProcessStatus::Error, Some(message)) = (next, error) {
            self.bus.publish(Event::process_error(id, message));
        }
        true
    }

    /// Record one output line; promotes `starting` to `running` on the
    /// readiness marker before the line itself is published.
    fn append_log(&self, id: &ProcessId, stream: LogStream, text: String) {
        debug!(process = %id, stream = stream.as_str(), "{}", text);
        let mut state = self.lock();
        let ready = !self.config.ready_marker.is_empty()
            && text.contains(&self.config.ready_marker)
            && state
                .records
                .get(id)
                .is_some_and(|r| r.status == ProcessStatus::Starting);

        let line = LogLine::now(stream, text);
        if let Some(buffer) = state.logs.get_mut(id) {
            buffer.push(line.clone());
        }
        if ready {
            self.apply(&mut state, id, ProcessStatus::Running, None);
        }
        self.bus.publish(Event::process_log(id, line));
    }

    fn handle_exit(&self, id: &ProcessId, result: io::Result<ExitStatus>) {
        let mut state = self.lock();
        let Some(record) = state.records.get(id) else {
            return;
        };
        let current = record.status;
        if current.is_terminal() {
            return;
        }
        let last_stderr = state
            .logs
            .get(id)
            .and_then(LogBuffer::last_stderr)
            .map(str::to_string);

        let (next, error) = match (current, result) {
            (ProcessStatus::Stopping, _) => (ProcessStatus::Stopped, None),
            (_, Err(e)) => (
                ProcessStatus::Error,
                Some(format!("failed to wait for server: {e}")),
            ),
            (ProcessStatus::Starting, Ok(status)) if status.success() => (
                ProcessStatus::Error,
                Some(exit_message("exited before becoming ready", status, last_stderr)),
            ),
            (_, Ok(status)) if status.success() => (ProcessStatus::Stopped, None),
            (_, Ok(status)) => (
                ProcessStatus::Error,
                Some(exit_message("exited unexpectedly", status, last_stderr)),
            ),
        };
        self.apply(&mut state, id, next, error);
    }
}

fn exit_message(what: &str, status: ExitStatus, last_stderr: Option<String>) -> String {
    let mut message = format!("server {what} ({})", describe_exit(status));
    if let Some(line) = last_stderr {
        message.push_str(": ");
        message.push_str(&line);
    }
    message
}

/// Owns the child: waits for exit or a force-kill request, drains the
/// output readers, then applies the exit transition.
async fn monitor_child(
    inner: Arc<Inner>,
    id: ProcessId,
    mut child: Child,
    force_kill: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    exited: watch::Sender<bool>,
) {
    let result = tokio::select! {
        biased;
        result = child.wait() => result,
        Ok(()) = force_kill => {
            debug!(process = %id, "Force killing process");
            if let Err(e) = child.start_kill() {
                warn!(process = %id, error = %e, "Failed to send kill signal");
            }
            child.wait().await
        }
    };

    if tokio::time::timeout(READER_DRAIN_TIMEOUT, join_all(readers))
        .await
        .is_err()
    {
        debug!(process = %id, "Output readers still open after exit");
    }

    inner.handle_exit(&id, result);
    exited.send_replace(true);
}

async fn wait_exited(exited: &mut watch::Receiver<bool>) {
    while !*exited.borrow_and_update() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

fn force(tx: &mut Option<oneshot::Sender<()>>) {
    if let Some(tx) = tx.take() {
        let _ = tx.send(());
    }
}

/// Supervisor for a pool of inference-server subprocesses.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        ports: Arc<PortAllocator>,
        registry: Arc<dyn ArtifactRegistryPort>,
        store: Arc<dyn ProcessStorePort>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ports,
                registry,
                store,
                bus,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.inner.ports
    }

    /// Recover persisted records.
    ///
    /// Records left `starting`/`running` cannot have survived the previous
    /// supervisor and become `stopped` with their port free. `stopping`
    /// records keep their port reserved. Terminal records are untouched.
    pub fn initialize(&self) -> Result<usize, ProcessError> {
        let loaded = self
            .inner
            .store
            .load()
            .map_err(|e| ProcessError::Persistence(e.to_string()))?;
        let count = loaded.len();

        let mut state = self.inner.lock();
        for mut record in loaded {
            match record.status {
                ProcessStatus::Starting | ProcessStatus::Running => {
                    debug!(process = %record.id, status = %record.status, "Recovered live record as stopped");
                    record.status = ProcessStatus::Stopped;
                    record.stopped_at = Some(chrono::Utc::now());
                    record.pid = None;
                }
                ProcessStatus::Stopping => {
                    if !self.inner.ports.reserve(record.port) {
                        warn!(process = %record.id, port = record.port, "Could not reserve port of recovered record");
                    }
                }
                ProcessStatus::Stopped | ProcessStatus::Error => {}
            }
            state
                .logs
                .insert(record.id.clone(), LogBuffer::with_capacity(self.inner.config.log_capacity));
            state.records.insert(record.id.clone(), record);
        }
        self.inner.persist(&state);
        drop(state);

        info!(records = count, "Process supervisor initialized");
        Ok(count)
    }

    /// Launch a server for `artifact_id`.
    ///
    /// Waits out the grace window; a failure inside it is returned here,
    /// later failures are only visible through events.
    pub async fn spawn(
        &self,
        artifact_id: &str,
        overrides: LaunchOverrides,
    ) -> Result<ProcessRecord, ProcessError> {
        overrides.validate()?;

        let artifact = self
            .inner
            .registry
            .find(artifact_id)
            .await
            .map_err(|e| ProcessError::Registry(e.to_string()))?
            .ok_or_else(|| ProcessError::ArtifactNotFound(artifact_id.to_string()))?;

        let config = &self.inner.config;
        let port = self.inner.ports.allocate()?;
        if !is_port_bindable(&config.host, port) {
            warn!(port = %port, "Allocated port is already bound by another process");
        }

        let launch = LaunchConfig::resolve(&config.defaults, &overrides, &config.host, port);
        let mut record = ProcessRecord::starting(
            artifact.id.clone(),
            artifact.name.clone(),
            artifact.path.clone(),
            launch,
        );
        let id = record.id.clone();

        let spawned = self.build_command(&record).and_then(|mut cmd| cmd.spawn());
        record.pid = spawned.as_ref().ok().and_then(Child::id);
        info!(process = %id, artifact = %artifact.id, port = %port, pid = ?record.pid, "Spawning server");

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);

        // The record becomes visible together with its child handle, so a
        // `kill` can never observe a live record without one.
        let mut child = {
            let mut state = self.inner.lock();
            state.records.insert(id.clone(), record);
            state
                .logs
                .insert(id.clone(), LogBuffer::with_capacity(config.log_capacity));

            match spawned {
                Ok(child) => {
                    state.children.insert(
                        id.clone(),
                        ChildHandle {
                            pid: child.id(),
                            force_kill: Some(kill_tx),
                            exited: exit_rx,
                        },
                    );
                    self.inner.announce(&state, &id);
                    child
                }
                Err(e) => {
                    self.inner.announce(&state, &id);
                    let message = format!("failed to launch '{}': {e}", config.command.join(" "));
                    self.inner
                        .apply(&mut state, &id, ProcessStatus::Error, Some(message.clone()));
                    return Err(ProcessError::SpawnFailed(message));
                }
            }
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.attach_reader(stdout, &id, LogStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.attach_reader(stderr, &id, LogStream::Stderr));
        }
        tokio::spawn(monitor_child(
            Arc::clone(&self.inner),
            id.clone(),
            child,
            kill_rx,
            readers,
            exit_tx,
        ));

        tokio::time::sleep(config.spawn_grace).await;

        let record = self
            .get(&id)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        if record.status == ProcessStatus::Error {
            let message = record
                .error
                .clone()
                .unwrap_or_else(|| "server exited during startup".to_string());
            return Err(ProcessError::EarlyExit(message));
        }
        Ok(record)
    }

    fn build_command(&self, record: &ProcessRecord) -> io::Result<Command> {
        let (program, leading) = self.inner.config.command.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "server command is empty")
        })?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(build_launch_args(&record.model_path, &record.config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn attach_reader(
        &self,
        stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
        id: &ProcessId,
        kind: LogStream,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let owner = id.clone();
        spawn_stream_reader(stream, id.clone(), kind, move |line| {
            inner.append_log(&owner, kind, line);
        })
    }

    /// Stop a process and wait until it has exited.
    ///
    /// Sends SIGTERM first unless `force`; the child is killed outright once
    /// the stop timeout elapses. Terminal records are left alone.
    pub async fn kill(&self, id: &ProcessId, force_now: bool) -> Result<(), ProcessError> {
        let (pid, mut exited, mut force_tx) = {
            let mut state = self.inner.lock();
            let status = state
                .records
                .get(id)
                .map(|r| r.status)
                .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
            if status.is_terminal() {
                return Ok(());
            }

            let handle = state
                .children
                .get_mut(id)
                .map(|h| (h.pid, h.exited.clone(), h.force_kill.take()));
            if status != ProcessStatus::Stopping {
                self.inner.apply(&mut state, id, ProcessStatus::Stopping, None);
            }
            match handle {
                Some(handle) => handle,
                None => {
                    self.inner.apply(&mut state, id, ProcessStatus::Stopped, None);
                    return Ok(());
                }
            }
        };

        let signalled = if force_now {
            false
        } else {
            pid.is_some_and(|pid| {
                send_terminate(pid).unwrap_or_else(|e| {
                    warn!(process = %id, pid, error = %e, "Failed to send SIGTERM");
                    false
                })
            })
        };
        if !signalled {
            force(&mut force_tx);
        }

        let timeout = self.inner.config.stop_timeout;
        if tokio::time::timeout(timeout, wait_exited(&mut exited))
            .await
            .is_err()
        {
            warn!(process = %id, ?timeout, "Process ignored SIGTERM, killing");
            force(&mut force_tx);
            if tokio::time::timeout(FORCE_KILL_WAIT, wait_exited(&mut exited))
                .await
                .is_err()
            {
                warn!(process = %id, "Process did not exit after kill");
            }
        }
        Ok(())
    }

    /// Stop a process and launch a fresh record with the same artifact and
    /// configuration. Host and port are derived again.
    pub async fn restart(&self, id: &ProcessId) -> Result<ProcessRecord, ProcessError> {
        let (artifact_id, overrides) = {
            let state = self.inner.lock();
            let record = state
                .records
                .get(id)
                .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
            (record.artifact_id.clone(), record.config.to_overrides())
        };
        self.kill(id, false).await?;
        self.spawn(&artifact_id, overrides).await
    }

    /// Probe the server's health endpoint. `false` unless the record is
    /// `running` and the health check answers 2xx in time.
    pub async fn check_health(&self, id: &ProcessId) -> Result<bool, ProcessError> {
        let record = self
            .get(id)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        if record.status != ProcessStatus::Running {
            return Ok(false);
        }
        Ok(check_http_health(
            &record.config.host,
            record.port,
            self.inner.config.health_timeout,
        )
        .await)
    }

    /// Forget a terminal record. Returns `Ok(false)` for unknown ids.
    pub fn remove(&self, id: &ProcessId) -> Result<bool, ProcessError> {
        let mut state = self.inner.lock();
        let Some(status) = state.records.get(id).map(|r| r.status) else {
            return Ok(false);
        };
        if status.is_live() {
            return Err(ProcessError::StillActive {
                id: id.to_string(),
                status: status.to_string(),
            });
        }
        state.records.shift_remove(id);
        state.logs.remove(id);
        state.children.remove(id);

        let records: Vec<ProcessRecord> = state.records.values().cloned().collect();
        self.inner
            .store
            .save(&records)
            .map_err(|e| ProcessError::Persistence(e.to_string()))?;
        debug!(process = %id, "Removed process record");
        Ok(true)
    }

    /// Records in creation order.
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    pub fn get(&self, id: &ProcessId) -> Option<ProcessRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Buffered output, all of it or the last `tail` lines.
    pub fn logs(&self, id: &ProcessId, tail: Option<usize>) -> Result<Vec<LogLine>, ProcessError> {
        let state = self.inner.lock();
        if !state.records.contains_key(id) {
            return Err(ProcessError::NotFound(id.to_string()));
        }
        Ok(state
            .logs
            .get(id)
            .map(|buffer| tail.map_or_else(|| buffer.all(), |n| buffer.tail(n)))
            .unwrap_or_default())
    }

    /// Subscribe to process events, starting with a snapshot of the
    /// matching records and their recent output.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let state = self.inner.lock();
        let (entity, records): (String, Vec<ProcessRecord>) = match &filter {
            EventFilter::Entity(entity) => (
                entity.clone(),
                state
                    .records
                    .get(&ProcessId::from(entity.as_str()))
                    .cloned()
                    .into_iter()
                    .collect(),
            ),
            EventFilter::Source(EventSource::Download) => (String::new(), Vec::new()),
            EventFilter::All | EventFilter::Source(EventSource::Process) => {
                (String::new(), state.records.values().cloned().collect())
            }
        };
        let tail = self.inner.config.snapshot_log_tail;
        let logs: BTreeMap<ProcessId, Vec<LogLine>> = records
            .iter()
            .filter_map(|r| state.logs.get(&r.id).map(|b| (r.id.clone(), b.tail(tail))))
            .collect();

        let init = Event::process_snapshot(entity, records, logs);
        self.inner.bus.subscribe_with_snapshot(filter, init)
    }

    /// Stop every live process.
    pub async fn shutdown(&self) {
        let live: Vec<ProcessId> = self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.status.is_live())
            .map(|r| r.id.clone())
            .collect();
        if live.is_empty() {
            return;
        }

        info!(count = live.len(), "Stopping all server processes");
        let results = join_all(live.iter().map(|id| self.kill(id, false))).await;
        for (id, result) in live.iter().zip(results) {
            if let Err(e) = result {
                warn!(process = %id, error = %e, "Failed to stop process during shutdown");
            }
        }
    }
}
