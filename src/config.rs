//! Engine configuration
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file is fine. The rating constants themselves (coefficients,
//! ballast, blend split) are not configurable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "rating.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RatingConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub calculation: CalculationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Entities per chunk when recalculating "all"
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Compute the entities of one level on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Used when a request does not name a source update level
    #[serde(default)]
    pub default_source_update_level: u8,

    /// Used when a request does not name a propagation level
    #[serde(default)]
    pub default_propagation_level: u8,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            parallel: true,
            default_source_update_level: 0,
            default_propagation_level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing-subscriber filter directive, RUST_LOG takes precedence
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

// Defaults
fn default_database_path() -> PathBuf { PathBuf::from("ratings.db") }
fn default_chunk_size() -> usize { 500 }
fn default_true() -> bool { true }
fn default_log_filter() -> String { "political_rating=info".to_string() }

impl RatingConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: RatingConfig = toml::from_str(content).context("invalid TOML configuration")?;
        config.normalize();
        Ok(config)
    }

    /// Load from `path` (or `rating.toml`); a missing file yields the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(RatingConfig::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    fn normalize(&mut self) {
        if self.calculation.chunk_size == 0 {
            self.calculation.chunk_size = 1;
        }
    }
}
