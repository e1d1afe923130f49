//! # Configuration
//!
//! Optional TOML file with server and loyalty settings. Every section and
//! field may be omitted.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [loyalty]
//! enabled = true
//! points_per_unit_milli = 1000
//! ```
//!
//! Security settings (API key, rate limit, CORS) come from the environment,
//! not from this file.

use brewline_core::{BrewlineError, LoyaltySettings, SettingsProvider};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum config file size (64 KB).
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub loyalty: LoyaltyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoyaltyConfig {
    pub enabled: bool,
    pub points_per_unit_milli: u64,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        let defaults = LoyaltySettings::default();
        Self {
            enabled: defaults.enabled,
            points_per_unit_milli: defaults.points_per_unit_milli,
        }
    }
}

impl Config {
    /// Parse a config document.
    pub fn parse(text: &str) -> Result<Self, BrewlineError> {
        toml::from_str(text).map_err(|e| BrewlineError::ConfigError(e.to_string()))
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, BrewlineError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let metadata = std::fs::metadata(path).map_err(|e| {
            BrewlineError::ConfigError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(BrewlineError::ConfigError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            BrewlineError::ConfigError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

impl SettingsProvider for Config {
    fn loyalty(&self) -> LoyaltySettings {
        LoyaltySettings {
            enabled: self.loyalty.enabled,
            points_per_unit_milli: self.loyalty.points_per_unit_milli,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
