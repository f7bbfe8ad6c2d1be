//! Command-line interface.
//!
//! Unified CLI for etkv operations.

pub mod commands;

use clap::{Parser, Subcommand};

use crate::core::config::ConfigOverrides;

/// etkv - etcd v3 API bridge over a transactional key-value backend.
#[derive(Parser, Debug)]
#[command(name = "etkv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Overrides taken from global flags.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the etkv server.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
