//! Runtime configuration.
//!
//! Values come from defaults, optionally overlaid by a JSON document and by
//! environment variables. `CHECKFLOW_*` names take precedence over the
//! legacy `ANALYSIS_TIMEOUT`, `AUTO_SAVE_ENABLED` and `LOG_LEVEL` names.

use crate::errors::ConfigError;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckflowConfig {
    /// Root directory of the filesystem artifact store.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Maximum number of stages running at once.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Per-attempt timeout for stages that do not set their own.
    #[serde(default = "default_stage_timeout_seconds")]
    pub stage_timeout_seconds: u64,

    /// Attempt budget for idempotent stages, including the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Retry backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Persist to disk; when false results are kept in memory only.
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `checkflow=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_stage_timeout_seconds() -> u64 {
    600
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CheckflowConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            worker_pool_size: default_worker_pool_size(),
            stage_timeout_seconds: default_stage_timeout_seconds(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            auto_save: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl CheckflowConfig {
    /// Loads defaults overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed or the result is
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|var| std::env::var(var).ok())
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays variables resolved by `lookup` onto this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed or the result is
    /// out of range.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).map(|value| ((*name).to_string(), value)))
        };

        if let Some((_, dir)) = first(&["CHECKFLOW_ARTIFACT_DIR"]) {
            self.artifact_dir = PathBuf::from(dir);
        }
        if let Some((var, value)) = first(&["CHECKFLOW_WORKER_POOL_SIZE"]) {
            self.worker_pool_size = parse(&var, &value)?;
        }
        if let Some((var, value)) = first(&["CHECKFLOW_STAGE_TIMEOUT_SECONDS", "ANALYSIS_TIMEOUT"]) {
            self.stage_timeout_seconds = parse(&var, &value)?;
        }
        if let Some((var, value)) = first(&["CHECKFLOW_MAX_ATTEMPTS"]) {
            self.max_attempts = parse(&var, &value)?;
        }
        if let Some((var, value)) = first(&["CHECKFLOW_BASE_DELAY_MS"]) {
            self.base_delay_ms = parse(&var, &value)?;
        }
        if let Some((var, value)) = first(&["CHECKFLOW_MAX_DELAY_MS"]) {
            self.max_delay_ms = parse(&var, &value)?;
        }
        if let Some((var, value)) = first(&["CHECKFLOW_AUTO_SAVE", "AUTO_SAVE_ENABLED"]) {
            self.auto_save = parse_bool(&var, &value)?;
        }
        if let Some((_, level)) = first(&["CHECKFLOW_LOG_LEVEL", "LOG_LEVEL"]) {
            self.logging.level = level.trim().to_ascii_lowercase();
        }
        if let Some((var, value)) = first(&["CHECKFLOW_LOG_JSON"]) {
            self.logging.json = parse_bool(&var, &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("worker_pool_size must be at least 1".into()));
        }
        if self.stage_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("stage_timeout_seconds must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Returns the default stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Returns the retry policy implied by the attempt and backoff settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay_ms(self.base_delay_ms)
            .with_max_delay_ms(self.max_delay_ms)
    }
}

fn parse<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
