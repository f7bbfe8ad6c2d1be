//! Start command implementation.

use crate::core::config::ConfigOverrides;
use crate::core::runtime::Runtime;
use anyhow::Result;
use clap::Args;
use std::path::Path;

use super::load_config;

/// Start the etkv server.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the member ID reported in response headers.
    #[arg(long)]
    pub member_id: Option<u64>,

    /// Override the default per-request deadline in milliseconds.
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command.
pub async fn run_start(
    config_path: Option<&Path>,
    mut overrides: ConfigOverrides,
    args: StartArgs,
) -> Result<()> {
    overrides.member_id = args.member_id.or(overrides.member_id);
    overrides.request_timeout_ms = args.request_timeout_ms.or(overrides.request_timeout_ms);

    let mut config = load_config(config_path)?;
    config.apply_overrides(&overrides);
    config.validate()?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
