//! `infera rm`: forget a terminal process record.
//!
//! Works on the state file directly rather than through a supervisor, so it
//! never rewrites the live records of a running `infera serve`.

use std::fs;
use std::io;

use anyhow::{Result, bail};
use tracing::warn;

use infera_core::{ProcessRecord, ProcessStorePort};

use super::resolve_process;
use crate::bootstrap::CliContext;

pub fn execute(ctx: &CliContext, id: &str) -> Result<()> {
    let records = ctx.store.load()?;
    let remaining = remove_record(&records, id)?;
    let removed = records
        .iter()
        .find(|r| !remaining.iter().any(|kept| kept.id == r.id))
        .map(|r| r.id.clone());
    ctx.store.save(&remaining)?;

    if let Some(removed) = removed {
        let log_file = ctx.log_file(removed.as_str());
        match fs::remove_file(&log_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %log_file.display(), error = %e, "Failed to remove log file"),
        }
        println!("Removed {removed}");
    }
    Ok(())
}

/// Records left after removing the one `id` resolves to.
fn remove_record(records: &[ProcessRecord], id: &str) -> Result<Vec<ProcessRecord>> {
    let target = resolve_process(records, id)?;
    if target.status.is_live() {
        bail!(
            "process {} is still {}; stop it from its 'infera serve' session first",
            target.id,
            target.status
        );
    }
    Ok(records
        .iter()
        .filter(|r| r.id != target.id)
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::record;
    use infera_core::ProcessStatus;

    #[test]
    fn test_remove_terminal_record() {
        let records = vec![
            record("aaa", ProcessStatus::Stopped),
            record("bbb", ProcessStatus::Error),
        ];
        let remaining = remove_record(&records, "bb").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "aaa");
    }

    #[test]
    fn test_live_record_is_kept() {
        let records = vec![record("aaa", ProcessStatus::Running)];
        let err = remove_record(&records, "aaa").unwrap_err().to_string();
        assert!(err.contains("still running"), "{err}");
    }
}
