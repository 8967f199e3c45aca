// Configuration File Support
//
// This module provides configuration file parsing for the Vagrant provider.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/vagrant-provider/config.toml

use crate::profiles::Profile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Driver name this crate implements
pub const DRIVER_NAME: &str = "vagrant";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Provider settings
    pub provider: ProviderConfig,

    /// VM profiles, keyed by name
    pub profiles: BTreeMap<String, Profile>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Per-provider driver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider alias used in events
    pub name: String,

    /// Driver name nodes are tagged with
    pub driver: String,

    /// Command used to dispatch remote functions
    pub salt_command: String,

    /// TCP connect timeout for request verification
    pub verify_timeout_secs: u64,

    /// Bootstrap command and arguments (empty disables bootstrap)
    pub bootstrap_command: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "vagrant".to_string(),
            driver: DRIVER_NAME.to_string(),
            salt_command: "salt".to_string(),
            verify_timeout_secs: 5,
            bootstrap_command: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            provider: ProviderConfig::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, returns default configuration with
    /// environment overrides applied.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the config file does not exist, the defaults go
    /// through the same environment overrides and validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/vagrant-provider/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "vagrant-provider", "vagrant-provider")
        {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("vagrant-provider").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - VAGRANT_PROVIDER_LOG_LEVEL
    /// - VAGRANT_PROVIDER_LOG_FORMAT
    /// - VAGRANT_PROVIDER_SALT_COMMAND
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("VAGRANT_PROVIDER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("VAGRANT_PROVIDER_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(command) = std::env::var("VAGRANT_PROVIDER_SALT_COMMAND") {
            if !command.trim().is_empty() {
                self.provider.salt_command = command;
            }
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.provider.driver.trim().is_empty() {
            anyhow::bail!("Provider driver must not be empty");
        }
        if self.provider.salt_command.trim().is_empty() {
            anyhow::bail!("Provider salt_command must not be empty");
        }

        for (name, profile) in &self.profiles {
            if !profile.driver.is_empty() && profile.driver != self.provider.driver {
                anyhow::bail!(
                    "Profile '{}' uses driver '{}' but provider driver is '{}'",
                    name,
                    profile.driver,
                    self.provider.driver
                );
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
