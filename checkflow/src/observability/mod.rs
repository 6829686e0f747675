//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; binaries and tests decide
//! whether and how to install a subscriber.

use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. With `config.json` the
/// output is one JSON object per line.
///
/// # Errors
///
/// Returns `ConfigError::Logging` if the level is not a valid filter
/// directive or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ConfigError::Logging(format!("invalid log level '{}': {e}", config.level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| ConfigError::Logging(e.to_string()))
}
