use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory, relative to the working directory
pub const CONFIG_DIR: &str = ".coverage-agent";

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "COVERAGE_AGENT_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid target_coverage: {0}. Must be between 0 and 100")]
    InvalidTargetCoverage(f64),

    #[error("Invalid max_iterations: 0. Must be at least 1")]
    InvalidMaxIterations,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty, compact")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Invalid requests_per_minute: 0. Must be at least 1")]
    InvalidRateLimit,

    #[error("Invalid burst_size: 0. Must be at least 1")]
    InvalidBurstSize,

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid tool_timeout_secs: 0. Must be at least 1")]
    InvalidToolTimeout,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.coverage-agent/config.yaml` (created by `init`)
    /// 3. `.coverage-agent/local.yaml` (optional local overrides)
    /// 4. `extra`, an explicit `--config` file
    /// 5. `COVERAGE_AGENT_*` environment variables
    ///
    /// `ANTHROPIC_API_KEY` fills `generation.api_key` when nothing else did.
    pub fn load(extra: Option<&Path>) -> Result<Config> {
        let dir = Path::new(CONFIG_DIR);
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")));

        if let Some(path) = extra {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        if config.generation.api_key.is_none() {
            config.generation.api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty());
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file over the defaults only
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&config.target_coverage) {
            return Err(ConfigError::InvalidTargetCoverage(config.target_coverage));
        }

        if config.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty", "compact"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        if config.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize);
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.validation.tool_timeout_secs == 0 {
            return Err(ConfigError::InvalidToolTimeout);
        }

        if config.generation.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "generation.model cannot be empty".to_string(),
            ));
        }

        if config.generation.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "generation.base_url cannot be empty".to_string(),
            ));
        }

        if config.vcs.branch_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "vcs.branch_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
