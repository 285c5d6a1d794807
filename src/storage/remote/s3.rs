//! Amazon S3 tier using the AWS CLI

use super::cli;
use super::{Namespace, RemoteObject, RemoteStorage, OUTPUT_ID_METADATA_KEY};
use crate::error::{CacheError, CacheResult};
use crate::storage::{Body, Counters};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Subset of `aws s3api head-object` output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObject {
    #[serde(default)]
    content_length: u64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Remote tier backed by an S3 bucket
#[derive(Debug)]
pub struct S3Store {
    bucket: String,
    namespace: Namespace,
    counters: Counters,
}

impl S3Store {
    pub fn new(bucket: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            bucket: bucket.into(),
            namespace,
            counters: Counters::new(),
        }
    }

    /// Fail if the AWS CLI is not installed
    pub async fn check_cli() -> CacheResult<()> {
        if cli::available("aws").await {
            Ok(())
        } else {
            Err(CacheError::CliNotFound {
                name: "aws".to_string(),
                hint: "Install it from https://aws.amazon.com/cli/".to_string(),
            })
        }
    }

    fn location(&self, action_id: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.namespace.object_key(action_id))
    }

    fn get_error(&self, action_id: &str, reason: impl Into<String>) -> CacheError {
        CacheError::RemoteGet {
            kind: self.kind(),
            location: format!("{}/{}", self.bucket, self.namespace.object_key(action_id)),
            reason: reason.into(),
        }
    }

    async fn fetch(&self, action_id: &str) -> CacheResult<Option<RemoteObject>> {
        let key = self.namespace.object_key(action_id);
        let args = vec![
            "s3api".to_string(),
            "head-object".to_string(),
            "--bucket".to_string(),
            self.bucket.clone(),
            "--key".to_string(),
            key,
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = cli::run("aws", &args).await?;
        if !output.success() {
            if output.is_not_found() {
                return Ok(None);
            }
            return Err(self.get_error(action_id, output.reason()));
        }

        let head: HeadObject = serde_json::from_slice(&output.stdout)
            .map_err(|e| self.get_error(action_id, format!("unreadable head-object output: {}", e)))?;
        let output_id = head
            .metadata
            .get(OUTPUT_ID_METADATA_KEY)
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| self.get_error(action_id, "outputID not found in S3 metadata for object"))?;

        Ok(Some(RemoteObject {
            output_id,
            size: head.content_length,
            body: None,
        }))
    }
}

#[async_trait]
impl RemoteStorage for S3Store {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn start(&self) -> CacheResult<()> {
        info!(
            "[{}] configured to s3://{}/{}",
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
            "s3".to_string(),
            "cp".to_string(),
            "--only-show-errors".to_string(),
            "--expected-size".to_string(),
            size.to_string(),
            "--metadata".to_string(),
            format!("{}={}", OUTPUT_ID_METADATA_KEY, output_id),
            "-".to_string(),
            self.location(action_id),
        ];

        let failure = match cli::upload("aws", &args, body).await {
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
