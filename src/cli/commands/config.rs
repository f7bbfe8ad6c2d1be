//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Print the effective configuration with defaults filled in.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Load the configuration at `path`, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Render a configuration as TOML or JSON.
pub fn render_config(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(config).context("failed to render JSON"),
        "toml" => toml::to_string_pretty(config).context("failed to render TOML"),
        other => anyhow::bail!("unknown format '{}', expected 'toml' or 'json'", other),
    }
}

/// Run the config command.
pub fn run_config(config_path: Option<&Path>, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => {
            let path = config_path.context("config validate requires --config")?;
            load_config(Some(path))?;
            println!("✓ Configuration is valid: {}", path.display());
            Ok(())
        }
        ConfigCommand::Show { format } => {
            let config = load_config(config_path)?;
            println!("{}", render_config(&config, &format)?);
            Ok(())
        }
    }
}
