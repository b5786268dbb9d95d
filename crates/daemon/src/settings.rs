//! Configuration loading for the daemon
//!
//! Sources, later ones win:
//! 1. built-in defaults (`JobConfig::default()`, per field)
//! 2. optional TOML file (`--config`, default `jobq.toml`)
//! 3. `JOBQ_*` environment variables, `__` between nested keys
//!    (`JOBQ_CONCURRENCY=20`, `JOBQ_QUEUES__LOW=1`)
//!
//! A `queues` table from any source replaces the default queue map as a whole.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use jobq_core::JobConfig;
use std::path::Path;

pub const ENV_PREFIX: &str = "JOBQ";

/// Load, expand and validate the engine configuration
pub fn load(config_path: &Path) -> Result<JobConfig> {
    let settings = Config::builder()
        .add_source(File::from(config_path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {}", config_path.display()))?;

    let mut config: JobConfig = settings
        .try_deserialize()
        .context("Invalid configuration")?;
    config.database_url = expand_database_url(&config.database_url);
    config.validate()?;
    Ok(config)
}

/// Expand `~` and environment variables in a database path or URL
pub fn expand_database_url(url: &str) -> String {
    match url.strip_prefix("sqlite://") {
        Some(path) => format!("sqlite://{}", expand_path(path)),
        None if url.starts_with("sqlite:") => url.to_string(),
        None => expand_path(url),
    }
}

fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned())
}
