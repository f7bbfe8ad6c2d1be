//! etkv - unified CLI entrypoint.
//!
//! Usage:
//!   etkv start [--config etkv.toml] [--log-level debug]
//!   etkv config validate --config etkv.toml
//!   etkv config show [--config etkv.toml] [--format json]

use anyhow::Result;
use clap::Parser;
use etkv::cli::commands::{run_config, run_start};
use etkv::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = cli.overrides();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(config_path.as_deref(), overrides, args).await,
        Commands::Config(args) => run_config(config_path.as_deref(), args),
    }
}
