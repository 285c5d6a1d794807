//! Cache storage tiers
//!
//! The protocol engine talks to one [`Storage`] implementation, chosen once at
//! startup by [`Backend::open`]:
//!
//! | Backend | Tiers |
//! |---------|-------|
//! | `Local` | local disk |
//! | `S3` | local disk + Amazon S3 |
//! | `Gcs` | local disk + Google Cloud Storage |
//!
//! # Disk Layout
//!
//! - `a-<actionID>`: JSON index entry pointing at an output
//! - `o-<outputID>`: raw output bytes
//!
//! Both are published by renaming a fully written temporary file, so a
//! reader never sees a partial object or a half-written index entry.

pub mod backend;
pub mod counters;
pub mod disk;
pub mod merge;
pub mod remote;
mod tee;

pub use backend::Backend;
pub use counters::{Counters, CountersSnapshot};
pub use disk::{DiskStore, IndexEntry};
pub use merge::MergeStore;
pub use remote::{RemoteObject, RemoteStorage};

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Byte source handed to `put`
pub type Body<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Result of a cache lookup
///
/// An empty `output_id` with no `disk_path` is a miss. A non-empty
/// `output_id` without a path means the entry exists but has no local copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    pub output_id: String,
    pub disk_path: Option<PathBuf>,
}

impl Lookup {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(output_id: impl Into<String>, disk_path: PathBuf) -> Self {
        Self {
            output_id: output_id.into(),
            disk_path: Some(disk_path),
        }
    }

    pub fn is_miss(&self) -> bool {
        self.output_id.is_empty() && self.disk_path.is_none()
    }
}

/// A cache store the protocol engine can serve from
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short store name used in logs and summaries
    fn kind(&self) -> &'static str;

    /// Prepare the store for use (create directories, check remotes)
    async fn start(&self) -> CacheResult<()>;

    /// Look up the output recorded for a hex action ID
    async fn get(&self, action_id: &str) -> CacheResult<Lookup>;

    /// Record `size` bytes from `body` as the output of an action and return
    /// the local path holding them
    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<PathBuf>;

    /// Release resources; called once at shutdown
    async fn close(&self) -> CacheResult<()>;

    /// Human-readable counters
    fn summary(&self) -> String;
}

/// Check that a fingerprint is lowercase hex before it becomes part of a path
pub(crate) fn validate_fingerprint(kind: &'static str, value: &str) -> CacheResult<()> {
    let valid = !value.is_empty()
        && value.len() % 2 == 0
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidFingerprint {
            kind,
            value: value.to_string(),
        })
    }
}
