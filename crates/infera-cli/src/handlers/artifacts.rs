//! `infera artifacts`: list artifacts in the models directory.

use anyhow::Result;
use indicatif::HumanBytes;

use infera_core::{Artifact, DownloadSource};

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, truncate_string};

pub fn execute(ctx: &CliContext) -> Result<()> {
    let artifacts = ctx.registry.list()?;
    if artifacts.is_empty() {
        println!("No artifacts in {}.", ctx.registry.root().display());
        println!("Use 'infera download' to fetch one.");
        return Ok(());
    }

    println!("{:<36} {:<24} {:>10}  Source", "ID", "Name", "Size");
    print_separator(100);
    for artifact in &artifacts {
        println!("{}", format_row(artifact));
    }
    Ok(())
}

fn format_row(artifact: &Artifact) -> String {
    format!(
        "{:<36} {:<24} {:>10}  {}",
        truncate_string(&artifact.id, 35),
        truncate_string(&artifact.name, 23),
        HumanBytes(artifact.size).to_string(),
        describe_source(artifact.source.as_ref()),
    )
}

fn describe_source(source: Option<&DownloadSource>) -> String {
    match source {
        None => "local".to_string(),
        Some(DownloadSource::Url { url }) => url.clone(),
        Some(DownloadSource::ObjectStore { bucket, key }) => format!("s3://{bucket}/{key}"),
        Some(DownloadSource::Repository {
            repo,
            file,
            revision,
        }) => match revision {
            Some(rev) => format!("{repo}@{rev}:{file}"),
            None => format!("{repo}:{file}"),
        },
    }
}
