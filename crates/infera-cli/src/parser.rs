//! Root CLI parser and global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Supervise inference servers and fetch model artifacts.
#[derive(Parser, Debug)]
#[command(name = "infera")]
#[command(about = "Supervise local inference servers and download model artifacts")]
#[command(version)]
pub struct Cli {
    /// Override the models directory for this invocation
    #[arg(long = "models-dir", global = true, env = "INFERA_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["infera", "ps", "--verbose", "--models-dir", "/tmp/models"]);
        assert!(cli.verbose);
        assert_eq!(cli.models_dir, Some(PathBuf::from("/tmp/models")));
        assert!(matches!(cli.command, Commands::Ps { json: false }));
    }
}
