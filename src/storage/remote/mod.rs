//! Remote object-store tiers
//!
//! A remote stores one object per action at `<namespace>/<actionID>`, with
//! the output ID kept in the object's metadata under [`OUTPUT_ID_METADATA_KEY`].
//! Adapters drive the vendor CLIs, which own credential discovery and retries.

mod cli;
pub mod gcs;
pub mod namespace;
pub mod s3;

pub use gcs::GcsStore;
pub use namespace::Namespace;
pub use s3::S3Store;

use crate::error::CacheResult;
use crate::storage::Body;
use async_trait::async_trait;
use std::fmt;
use tokio::io::AsyncRead;

/// Metadata key holding the output ID of a remote object
pub const OUTPUT_ID_METADATA_KEY: &str = "outputid";

/// Object found in a remote tier
pub struct RemoteObject {
    pub output_id: String,
    pub size: u64,
    /// Object contents, if the adapter opened them; the CLI adapters report
    /// metadata only
    pub body: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("output_id", &self.output_id)
            .field("size", &self.size)
            .field("body", &self.body.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Remote tier interface
///
/// `get` returns `Ok(None)` for a clean miss.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn start(&self) -> CacheResult<()>;

    async fn get(&self, action_id: &str) -> CacheResult<Option<RemoteObject>>;

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<()>;

    async fn close(&self) -> CacheResult<()>;

    fn summary(&self) -> String;
}
