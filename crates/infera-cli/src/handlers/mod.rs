//! Command handlers.
//!
//! Signature: `pub async fn execute(ctx: &CliContext, ...) -> Result<()>`.
//! Handlers parse CLI-specific input, call the supervisors and format the
//! result for the terminal. State transitions stay inside the supervisors.

pub mod artifacts;
pub mod download;
pub mod logs;
pub mod ps;
pub mod rm;
pub mod serve;

use anyhow::{Result, bail};

use infera_core::ProcessRecord;

/// Find a record by full id or unique id prefix.
pub fn resolve_process<'a>(records: &'a [ProcessRecord], query: &str) -> Result<&'a ProcessRecord> {
    if query.is_empty() {
        bail!("process id must not be empty");
    }
    if let Some(exact) = records.iter().find(|r| r.id.as_str() == query) {
        return Ok(exact);
    }
    let matches: Vec<&ProcessRecord> = records
        .iter()
        .filter(|r| r.id.as_str().starts_with(query))
        .collect();
    match matches.as_slice() {
        [] => bail!("no process matches '{query}'"),
        [only] => Ok(only),
        many => bail!(
            "'{query}' matches {} processes; use a longer prefix",
            many.len()
        ),
    }
}
