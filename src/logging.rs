//! Tracing subscriber setup

use crate::config::LoggingConfig;
use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("weather_advisory={level},tower_http={level},warn")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match config.format.as_str() {
        "json" => builder.json().with_current_span(true).try_init(),
        _ => builder.with_target(false).try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
