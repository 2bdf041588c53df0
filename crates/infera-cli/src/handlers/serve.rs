//! `infera serve`: launch servers and follow them in the foreground.
//!
//! Output lines are echoed with a short id prefix and mirrored to
//! `<state dir>/logs/<id>.log` for `infera logs`. Ctrl-C stops every server
//! this session started; the session also ends once all of them have exited.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use infera_core::{
    Event, EventFilter, EventKind, EventPayload, EventSource, LogLine, ProcessId, ProcessRecord,
};

use crate::bootstrap::CliContext;
use crate::commands::LaunchArgs;
use crate::presentation::short_id;

pub async fn execute(ctx: &CliContext, artifacts: &[String], launch: &LaunchArgs) -> Result<()> {
    let supervisor = ctx.supervisor();
    let recovered = supervisor
        .initialize()
        .context("failed to load process state")?;
    debug!(recovered, "Loaded process records");

    // Subscribe before spawning so no startup output is missed.
    let mut events = supervisor.subscribe(EventFilter::Source(EventSource::Process));
    let mut session = Session::new(ctx.logs_dir());

    let overrides = launch.to_overrides();
    for artifact in artifacts {
        match supervisor.spawn(artifact, overrides.clone()).await {
            Ok(record) => {
                println!(
                    "Started {} ({}) on http://{}:{}",
                    record.name,
                    short_id(record.id.as_str()),
                    record.config.host,
                    record.port
                );
                session.track(&record);
            }
            Err(e) => {
                // Flush whatever the failed server printed before giving up.
                while let Some(event) = events.try_recv() {
                    session.handle(&event);
                }
                supervisor.shutdown().await;
                return Err(e).with_context(|| format!("failed to start {artifact}"));
            }
        }
    }

    println!("Press Ctrl+C to stop");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => {
                println!();
                println!("Stopping servers...");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                session.handle(&event);
                if session.all_exited() {
                    break;
                }
            }
        }
    }

    supervisor.shutdown().await;
    while let Some(event) = events.try_recv() {
        session.handle(&event);
    }
    Ok(())
}

/// Processes started by this invocation and their log files.
struct Session {
    logs_dir: PathBuf,
    live: HashSet<ProcessId>,
    files: HashMap<ProcessId, File>,
}

impl Session {
    fn new(logs_dir: PathBuf) -> Self {
        Self {
            logs_dir,
            live: HashSet::new(),
            files: HashMap::new(),
        }
    }

    fn track(&mut self, record: &ProcessRecord) {
        if record.status.is_live() {
            self.live.insert(record.id.clone());
        }
    }

    fn all_exited(&self) -> bool {
        self.live.is_empty()
    }

    fn handle(&mut self, event: &Event) {
        if event.kind == EventKind::Init {
            return;
        }
        let id = ProcessId::from(event.entity_id.as_str());
        match &event.payload {
            EventPayload::Log { line } => {
                println!("[{}] {}", short_id(id.as_str()), line.line);
                if let Err(e) = self.mirror(&id, line) {
                    warn!(process = %id, error = %e, "Failed to write log file");
                }
            }
            EventPayload::Process { record } => {
                println!(
                    "[{}] {} is {}",
                    short_id(id.as_str()),
                    record.name,
                    record.status
                );
                if record.status.is_terminal() {
                    self.live.remove(&record.id);
                    self.files.remove(&record.id);
                }
            }
            EventPayload::Error { message } => {
                eprintln!("[{}] error: {message}", short_id(id.as_str()));
            }
            _ => {}
        }
    }

    fn mirror(&mut self, id: &ProcessId, line: &LogLine) -> io::Result<()> {
        let file = match self.files.entry(id.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                fs::create_dir_all(&self.logs_dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.logs_dir.join(format!("{id}.log")))?;
                entry.insert(file)
            }
        };
        writeln!(file, "{}", format_log_line(line))
    }
}

fn format_log_line(line: &LogLine) -> String {
    format!(
        "{} {} {}",
        line.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        line.stream.as_str(),
        line.line
    )
}
