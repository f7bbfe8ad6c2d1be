//! CLI command implementations.

mod config;
mod start;

pub use config::{load_config, render_config, run_config, ConfigArgs, ConfigCommand};
pub use start::{run_start, StartArgs};
