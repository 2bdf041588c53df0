//! `infera ps`: list persisted process records.

use anyhow::Result;

use infera_core::{ProcessRecord, ProcessStorePort};

use crate::bootstrap::CliContext;
use crate::presentation::{format_optional, format_time, print_separator, short_id, truncate_string};

pub fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let records = ctx.store.load()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No processes recorded.");
        println!("Use 'infera serve <artifact>' to start one.");
        return Ok(());
    }

    println!(
        "{:<10} {:<28} {:<9} {:<6} {:<8} {:<20} Error",
        "ID", "Name", "Status", "Port", "PID", "Started"
    );
    print_separator(100);
    for record in &records {
        println!("{}", format_row(record));
    }
    Ok(())
}

fn format_row(record: &ProcessRecord) -> String {
    format!(
        "{:<10} {:<28} {:<9} {:<6} {:<8} {:<20} {}",
        short_id(record.id.as_str()),
        truncate_string(&record.name, 27),
        record.status,
        record.port,
        format_optional(record.pid, "--"),
        format_time(record.started_at),
        record.error.as_deref().unwrap_or(""),
    )
}
