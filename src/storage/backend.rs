//! Backend selection
//!
//! The tier layout is decided once from configuration; every request then
//! goes through a plain `match` instead of a trait object.

use crate::config::Config;
use crate::error::CacheResult;
use crate::storage::remote::{GcsStore, Namespace, S3Store};
use crate::storage::{Body, DiskStore, Lookup, MergeStore, Storage};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// The store the protocol engine serves from
pub enum Backend {
    /// Local disk only
    Local(DiskStore),
    /// Local disk mirrored to Amazon S3
    S3(MergeStore<S3Store>),
    /// Local disk mirrored to Google Cloud Storage
    Gcs(MergeStore<GcsStore>),
}

impl Backend {
    /// Build the backend described by `config`.
    ///
    /// A remote that cannot be set up is reported and skipped, leaving a
    /// local-only cache.
    pub async fn open(config: &Config) -> CacheResult<Self> {
        let disk = DiskStore::new(config.cache_dir()?);

        if let Some(bucket) = config.remote.s3_bucket.as_deref() {
            if let Err(e) = S3Store::check_cli().await {
                warn!("Amazon S3 configuration failed: {}", e);
                return Ok(Self::Local(disk));
            }
            let namespace = Namespace::detect(&config.cache.key).await;
            info!("Using Amazon S3 bucket {} as remote cache", bucket);
            return Ok(Self::S3(MergeStore::new(disk, S3Store::new(bucket, namespace))));
        }

        if let Some(bucket) = config.remote.gcs_bucket.as_deref() {
            if let Err(e) = GcsStore::check_cli().await {
                warn!("Google Cloud Storage configuration failed: {}", e);
                return Ok(Self::Local(disk));
            }
            let namespace = Namespace::detect(&config.cache.key).await;
            info!("Using Google Cloud Storage bucket {} as remote cache", bucket);
            return Ok(Self::Gcs(MergeStore::new(disk, GcsStore::new(bucket, namespace))));
        }

        Ok(Self::Local(disk))
    }
}

#[async_trait]
impl Storage for Backend {
    fn kind(&self) -> &'static str {
        match self {
            Self::Local(store) => store.kind(),
            Self::S3(store) => store.kind(),
            Self::Gcs(store) => store.kind(),
        }
    }

    async fn start(&self) -> CacheResult<()> {
        match self {
            Self::Local(store) => store.start().await,
            Self::S3(store) => store.start().await,
            Self::Gcs(store) => store.start().await,
        }
    }

    async fn get(&self, action_id: &str) -> CacheResult<Lookup> {
        match self {
            Self::Local(store) => store.get(action_id).await,
            Self::S3(store) => store.get(action_id).await,
            Self::Gcs(store) => store.get(action_id).await,
        }
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<PathBuf> {
        match self {
            Self::Local(store) => store.put(action_id, output_id, size, body).await,
            Self::S3(store) => store.put(action_id, output_id, size, body).await,
            Self::Gcs(store) => store.put(action_id, output_id, size, body).await,
        }
    }

    async fn close(&self) -> CacheResult<()> {
        match self {
            Self::Local(store) => store.close().await,
            Self::S3(store) => store.close().await,
            Self::Gcs(store) => store.close().await,
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::Local(store) => store.summary(),
            Self::S3(store) => store.summary(),
            Self::Gcs(store) => store.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    /// Run `f` with `PATH` pointing at an empty directory
    async fn without_clis<F, Fut, T>(f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let empty = TempDir::new().unwrap();
        let saved = std::env::var_os("PATH");
        std::env::set_var("PATH", empty.path());
        let result = f().await;
        match saved {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
        result
    }

    #[tokio::test]
    async fn local_only_without_buckets() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(temp.path().to_path_buf());

        let backend = Backend::open(&config).await.unwrap();
        assert!(matches!(backend, Backend::Local(_)));
        assert_eq!(backend.kind(), "disk");
    }

    #[tokio::test]
    async fn local_backend_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(temp.path().join("cache"));

        let backend = Backend::open(&config).await.unwrap();
        backend.start().await.unwrap();
        let path = backend
            .put("aa", "bb", 5, &mut &b"hello"[..])
            .await
            .unwrap();
        assert_eq!(backend.get("aa").await.unwrap(), Lookup::hit("bb", path));
        assert!(backend.summary().contains("[disk] 1 gets, 1 hits"));
    }

    #[tokio::test]
    #[serial]
    async fn missing_aws_cli_falls_back_to_local() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(temp.path().join("cache"));
        config.remote.s3_bucket = Some("builds".to_string());

        let backend = without_clis(|| Backend::open(&config)).await.unwrap();
        assert!(matches!(backend, Backend::Local(_)));
    }

    #[tokio::test]
    #[serial]
    async fn missing_gcloud_cli_falls_back_to_local() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(temp.path().join("cache"));
        config.remote.gcs_bucket = Some("builds".to_string());

        let backend = without_clis(|| Backend::open(&config)).await.unwrap();
        assert!(matches!(backend, Backend::Local(_)));
    }
}
