//! `infera download`: fetch one artifact with a progress display.
//!
//! Ctrl-C cancels the transfer; partial files are cleaned up by the
//! coordinator before this command returns.

use anyhow::{Result, bail};

use infera_core::{DownloadRecord, DownloadStatus, EventFilter, EventPayload};

use crate::bootstrap::CliContext;
use crate::commands::DownloadCommand;
use crate::presentation::DownloadProgress;

pub async fn execute(ctx: &CliContext, request: DownloadCommand) -> Result<()> {
    let coordinator = ctx.coordinator();
    let (name, source) = request.into_request();

    let started = coordinator.start_download(&name, source)?;
    let id = started.id.clone();
    let mut events = coordinator.subscribe(EventFilter::entity(id.as_str()));
    let mut display = DownloadProgress::new(&started.filename);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    let finished = loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                if !coordinator.cancel_download(&id) {
                    tracing::debug!(download = %id, "Cancel ignored; transfer is finishing");
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break coordinator.get(&id);
                };
                match event.payload {
                    EventPayload::Progress { progress } => display.update(&progress),
                    EventPayload::Download { record } if record.status.is_terminal() => {
                        break Some(record);
                    }
                    EventPayload::Downloads { downloads } => {
                        if let Some(record) = downloads.into_iter().find(|r| r.status.is_terminal()) {
                            break Some(record);
                        }
                    }
                    _ => {}
                }
            }
        }
    };
    display.finish();
    coordinator.shutdown().await;

    match finished {
        Some(record) => report(ctx, &record),
        None => bail!("download {id} disappeared"),
    }
}

fn report(ctx: &CliContext, record: &DownloadRecord) -> Result<()> {
    match record.status {
        DownloadStatus::Completed => {
            println!(
                "Downloaded {} to {}",
                record.name,
                ctx.registry.root().join(&record.filename).display()
            );
            if let Some(artifact_id) = &record.artifact_id {
                println!("Serve it with: infera serve {artifact_id}");
            }
            Ok(())
        }
        DownloadStatus::Cancelled => bail!("download of {} cancelled", record.name),
        _ => bail!(
            "download of {} failed: {}",
            record.name,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
