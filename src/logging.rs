//! Structured logging on `tracing`. `MENU_BRIDGE_LOG` overrides the configured
//! filter.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig, LOG_ENV};

pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).with_context(|| format!("Invalid log filter '{}'", config.level))
}

/// Installs the global subscriber. Returns `false` when one was already set.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_env_filter(config)?;
    let base = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Json => base.with(fmt::layer().json().with_target(true).with_writer(std::io::stderr)).try_init(),
        LogFormat::Text => base.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).try_init(),
    };
    Ok(installed.is_ok())
}
