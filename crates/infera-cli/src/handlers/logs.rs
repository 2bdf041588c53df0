//! `infera logs`: print mirrored process output.

use std::fs;
use std::io;

use anyhow::{Context, Result};

use infera_core::ProcessStorePort;

use super::resolve_process;
use crate::bootstrap::CliContext;

pub fn execute(ctx: &CliContext, id: &str, tail: Option<usize>) -> Result<()> {
    let records = ctx.store.load()?;
    let record = resolve_process(&records, id)?;
    let path = ctx.log_file(record.id.as_str());

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("No output captured for {}.", record.id);
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    for line in last_lines(&content, tail) {
        println!("{line}");
    }
    Ok(())
}

fn last_lines(content: &str, tail: Option<usize>) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
    lines[skip..].to_vec()
}
