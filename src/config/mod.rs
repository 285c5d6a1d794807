//! Configuration management for gocache
//!
//! Settings come from an optional TOML file, overridden by command-line
//! flags and their environment variables.

pub mod schema;

pub use schema::Config;

use crate::cli::Cli;
use crate::error::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gocache")
            .join("config.toml")
    }

    /// Get the default local cache directory
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("gocache"))
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> CacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> CacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| CacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the config file and apply command-line overrides
    pub async fn load_with_overrides(&self, cli: &Cli) -> CacheResult<Config> {
        let mut config = self.load().await?;
        apply_overrides(&mut config, cli);
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-empty flag values replace file values
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.dir {
        config.cache.dir = Some(dir.clone());
    }
    if let Some(key) = cli.key.as_deref().filter(|k| !k.is_empty()) {
        config.cache.key = key.to_string();
    }
    if let Some(bucket) = cli.s3_bucket.as_deref().filter(|b| !b.is_empty()) {
        config.remote.s3_bucket = Some(bucket.to_string());
    }
    if let Some(bucket) = cli.gcs_bucket.as_deref().filter(|b| !b.is_empty()) {
        config.remote.gcs_bucket = Some(bucket.to_string());
    }
}
