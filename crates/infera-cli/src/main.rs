//! CLI entry point - the composition root.
//!
//! Parses arguments, sets up logging and configuration, then hands a
//! [`CliContext`](infera_cli::CliContext) to the matching handler.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use infera_cli::{Cli, Commands, bootstrap, handlers};
use infera_core::InferaConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads `env` defaults
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = InferaConfig::from_env().context("invalid configuration")?;
    if let Some(models_dir) = cli.models_dir {
        config.models_dir = models_dir;
    }
    let ctx = bootstrap(config)?;

    match cli.command {
        Commands::Serve { artifacts, launch } => {
            handlers::serve::execute(&ctx, &artifacts, &launch).await?;
        }
        Commands::Ps { json } => handlers::ps::execute(&ctx, json)?,
        Commands::Logs { id, tail } => handlers::logs::execute(&ctx, &id, tail)?,
        Commands::Rm { id } => handlers::rm::execute(&ctx, &id)?,
        Commands::Download { source } => handlers::download::execute(&ctx, source).await?,
        Commands::Artifacts => handlers::artifacts::execute(&ctx)?,
    }

    Ok(())
}
