use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::FailureType;

/// Project config file, relative to the working directory.
pub const CONFIG_FILE: &str = "loadfleet.yaml";

/// Optional local overrides, relative to the working directory.
pub const LOCAL_CONFIG_FILE: &str = "loadfleet.local.yaml";

/// Prefix for environment overrides, e.g. `LOADFLEET_SUPERVISOR__INTERVAL_MS`.
pub const ENV_PREFIX: &str = "LOADFLEET_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid supervisor interval: {0}ms. Must be positive")]
    InvalidInterval(u64),

    #[error("Scratch directory cannot be empty")]
    EmptyScratchDir,

    #[error("Failure output directory cannot be empty")]
    EmptyOutputDir,

    #[error("Agent endpoint cannot be empty")]
    EmptyAgentEndpoint,

    #[error("{0} cannot be configured as non-critical")]
    InvalidNonCriticalFailure(FailureType),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. loadfleet.yaml
    /// 3. loadfleet.local.yaml (optional)
    /// 4. Environment variables (LOADFLEET_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_with(None)
    }

    /// Like [`load`](Self::load), with an explicit file merged after the
    /// project files and before the environment.
    pub fn load_with(explicit: Option<&Path>) -> Result<Config> {
        let config: Config = Self::figment(explicit)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, ignoring project files and the
    /// environment.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(CONFIG_FILE))
            .merge(Yaml::file(LOCAL_CONFIG_FILE));
        if let Some(path) = explicit {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.supervisor.interval_ms == 0 {
            return Err(ConfigError::InvalidInterval(config.supervisor.interval_ms));
        }

        if config.supervisor.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyScratchDir);
        }

        if config.supervisor.agent_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyAgentEndpoint);
        }

        if config.coordinator.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyOutputDir);
        }

        if let Some(finished) = config
            .coordinator
            .non_critical_failures
            .iter()
            .find(|t| t.is_worker_finished())
        {
            return Err(ConfigError::InvalidNonCriticalFailure(*finished));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
