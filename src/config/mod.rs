//! Configuration management for slashguard
//!
//! Supports loading configuration from:
//! - Environment variables (SLASHGUARD_*)
//! - Config file (slashguard.toml)

use crate::checker::ClientPermissions;
use crate::errors::{Result, SlashGuardError};
use crate::rules::RuleConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rule provider configuration
    pub rules: RulesConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Per-client permissions
    pub permissions: Vec<ClientPermissions>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Rule provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Providers in evaluation order
    pub providers: Vec<RuleConfig>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            providers: vec![RuleConfig::SlashingProtection],
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Slashing protection records file; in-memory only when unset
    pub slashing_protection_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Defaults come from the serde attributes; arrays given here
        // replace them rather than merging element-wise.
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        } else {
            builder = builder
                .add_source(config::File::with_name("slashguard").required(false))
                .add_source(config::File::with_name("/etc/slashguard/config").required(false));
        }

        // SLASHGUARD_LOGGING__LEVEL, SLASHGUARD_STORAGE__SLASHING_PROTECTION_PATH, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("SLASHGUARD")
                .separator("__")
                .try_parsing(true),
        );

        Self::finish(builder)
    }

    /// Load configuration from an in-memory TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SlashGuardError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.rules.providers.is_empty() {
            info!("No rule providers configured; every request will be denied");
        }

        for provider in &self.rules.providers {
            if let RuleConfig::TimeWindow(window) = provider {
                window.validate()?;
            }
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(SlashGuardError::ConfigError(format!(
                    "Unknown log format: {}",
                    other
                )))
            }
        }

        if let Some(path) = &self.storage.slashing_protection_path {
            if !path.exists() {
                info!(
                    "Slashing protection file does not exist, will create: {:?}",
                    path
                );
            }
        }

        Ok(())
    }
}
