//! Google Cloud Storage tier using the gcloud CLI

use super::cli;
use super::{Namespace, RemoteObject, RemoteStorage, OUTPUT_ID_METADATA_KEY};
use crate::error::{CacheError, CacheResult};
use crate::storage::{Body, Counters};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Remote tier backed by a GCS bucket
#[derive(Debug)]
pub struct GcsStore {
    bucket: String,
    namespace: Namespace,
    counters: Counters,
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            bucket: bucket.into(),
            namespace,
            counters: Counters::new(),
        }
    }

    /// Fail if the gcloud CLI is not installed
    pub async fn check_cli() -> CacheResult<()> {
        if cli::available("gcloud").await {
            Ok(())
        } else {
            Err(CacheError::CliNotFound {
                name: "gcloud".to_string(),
                hint: "Install it from https://cloud.google.com/sdk".to_string(),
            })
        }
    }

    fn location(&self, action_id: &str) -> String {
        format!("gs://{}/{}", self.bucket, self.namespace.object_key(action_id))
    }

    async fn fetch(&self, action_id: &str) -> CacheResult<Option<RemoteObject>> {
        let location = self.location(action_id);
        let args = vec![
            "storage".to_string(),
            "objects".to_string(),
            "describe".to_string(),
            location.clone(),
            "--format=json".to_string(),
        ];
        let output = cli::run("gcloud", &args).await?;
        if !output.success() {
            if output.is_not_found() {
                return Ok(None);
            }
            return Err(self.get_error(&location, output.reason()));
        }

        let described: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| self.get_error(&location, format!("unreadable describe output: {}", e)))?;
        let (output_id, size) = parse_description(&described)
            .ok_or_else(|| self.get_error(&location, "outputID not found in GCS metadata for object"))?;

        Ok(Some(RemoteObject {
            output_id,
            size,
            body: None,
        }))
    }

    fn get_error(&self, location: &str, reason: impl Into<String>) -> CacheError {
        CacheError::RemoteGet {
            kind: self.kind(),
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

/// Pull the output ID and size out of `gcloud storage objects describe`.
///
/// Newer gcloud releases report custom metadata as `custom_fields`, older
/// ones as `metadata`; the size may be a string or a number.
fn parse_description(described: &Value) -> Option<(String, u64)> {
    let output_id = ["custom_fields", "metadata"]
        .iter()
        .filter_map(|field| described.get(field)?.get(OUTPUT_ID_METADATA_KEY)?.as_str())
        .find(|id| !id.is_empty())?
        .to_string();

    let size = match described.get("size") {
        Some(Value::String(s)) => s.parse().ok()?,
        Some(Value::Number(n)) => n.as_u64()?,
        _ => 0,
    };

    Some((output_id, size))
}

#[async_trait]
impl RemoteStorage for GcsStore {
    fn kind(&self) -> &'static str {
        "gcs"
    }

    async fn start(&self) -> CacheResult<()> {
        info!(
            "[{}] configured to gs://{}/{}",
            self.kind(),
            self.bucket,
            self.namespace.prefix()
        );
        Ok(())
    }

    async fn get(&self, action_id: &str) -> CacheResult<Option<RemoteObject>> {
        self.counters.get();
        let result = self.fetch(action_id).await;
        match &result {
            Ok(Some(_)) => self.counters.hit(),
            Ok(None) => self.counters.miss(),
            Err(_) => self.counters.get_error(),
        }
        result
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<()> {
        self.counters.put();
        let args = vec![
            "storage".to_string(),
            "cp".to_string(),
            "--no-user-output-enabled".to_string(),
            format!("--custom-metadata={}={}", OUTPUT_ID_METADATA_KEY, output_id),
            "-".to_string(),
            self.location(action_id),
        ];

        let failure = match cli::upload("gcloud", &args, body).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => output.reason(),
            Err(e) => e.to_string(),
        };
        self.counters.put_error();
        Err(CacheError::RemotePut {
            kind: self.kind(),
            location: self.location(action_id),
            output_id: output_id.to_string(),
            size,
            reason: failure,
        })
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }

    fn summary(&self) -> String {
        self.counters.summary(self.kind())
    }
}
