//! Configuration schema for gocache
//!
//! Configuration is stored at `~/.config/gocache/config.toml`

use crate::config::ConfigManager;
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default namespace component for remote keys
pub const DEFAULT_CACHE_KEY: &str = "v1";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local cache settings
    pub cache: CacheConfig,

    /// Remote tier settings
    pub remote: RemoteConfig,
}

impl Config {
    /// Absolute local cache directory, falling back to the user cache directory
    pub fn cache_dir(&self) -> CacheResult<PathBuf> {
        let dir = match &self.cache.dir {
            Some(dir) => dir.clone(),
            None => ConfigManager::default_cache_dir().ok_or(CacheError::NoCacheDir)?,
        };
        std::path::absolute(&dir)
            .map_err(|e| CacheError::io(format!("resolving {}", dir.display()), e))
    }
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding index entries and objects
    pub dir: Option<PathBuf>,

    /// Key separating incompatible caches in the remote namespace
    pub key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            key: DEFAULT_CACHE_KEY.to_string(),
        }
    }
}

/// Remote tier settings; at most one bucket is used, S3 first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Amazon S3 bucket name
    pub s3_bucket: Option<String>,

    /// Google Cloud Storage bucket name
    pub gcs_bucket: Option<String>,
}
