#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the binary entry point only
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod handlers;
pub mod parser;
pub mod presentation;
pub mod registry;

pub use bootstrap::{CliContext, bootstrap};
pub use commands::{Commands, DownloadCommand, LaunchArgs};
pub use parser::Cli;
pub use registry::DirectoryRegistry;
