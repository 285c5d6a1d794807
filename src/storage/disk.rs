//! Local disk store
//!
//! Objects are content addressed (`o-<outputID>`) and index entries are keyed
//! by action (`a-<actionID>`). Every non-empty write goes to a temporary file
//! in the cache directory first and is renamed into place once complete.

use crate::error::{CacheError, CacheResult};
use crate::storage::{validate_fingerprint, Body, Counters, Lookup, Storage};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current index entry format
const INDEX_VERSION: u32 = 1;

/// Index entry stored for an action ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "v")]
    pub version: u32,

    /// Hex output ID
    #[serde(rename = "o")]
    pub output_id: String,

    #[serde(rename = "n")]
    pub size: u64,

    /// Unix time of the put, in nanoseconds; absent in older entries
    #[serde(rename = "t", default)]
    pub time_nanos: i64,
}

impl IndexEntry {
    pub fn new(output_id: &str, size: u64) -> Self {
        Self {
            version: INDEX_VERSION,
            output_id: output_id.to_string(),
            size,
            time_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

/// Store backed by a single local directory
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    counters: Counters,
}

impl DiskStore {
    /// Create a store rooted at `dir`; the directory is created by `start`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counters: Counters::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Path of the index entry for an action
    pub fn action_path(&self, action_id: &str) -> PathBuf {
        self.dir.join(format!("a-{}", action_id))
    }

    /// Path of the object file for an output
    pub fn object_path(&self, output_id: &str) -> PathBuf {
        self.dir.join(format!("o-{}", output_id))
    }

    async fn lookup(&self, action_id: &str) -> CacheResult<Lookup> {
        if action_id.is_empty() {
            return Ok(Lookup::miss());
        }
        validate_fingerprint("actionID", action_id)?;

        let path = self.action_path(action_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Lookup::miss()),
            Err(e) => {
                return Err(CacheError::io(
                    format!("reading index entry {}", path.display()),
                    e,
                ))
            }
        };

        let entry: IndexEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("JSON error for action {:?}: {}", action_id, e);
                return Ok(Lookup::miss());
            }
        };

        // A corrupted output ID must never become part of a path
        if validate_fingerprint("outputID", &entry.output_id).is_err() {
            warn!(
                "Ignoring index entry for action {:?} with invalid outputID {:?}",
                action_id, entry.output_id
            );
            return Ok(Lookup::miss());
        }

        let object = self.object_path(&entry.output_id);
        Ok(Lookup::hit(entry.output_id, object))
    }

    async fn store(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<PathBuf> {
        validate_fingerprint("actionID", action_id)?;
        validate_fingerprint("outputID", output_id)?;

        let object = self.object_path(output_id);

        // Empty outputs are common and have no partial state to hide
        if size == 0 {
            fs::File::create(&object)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", object.display()), e))?;
        } else {
            let (temp, wrote) = write_temp(&object, body).await?;
            if wrote != size {
                return Err(CacheError::ShortWrite {
                    wrote,
                    expected: size,
                });
            }
            temp.publish(&object).await?;
        }

        let entry = serde_json::to_vec(&IndexEntry::new(output_id, size))?;
        let index = self.action_path(action_id);
        let (temp, _) = write_temp(&index, &mut entry.as_slice()).await?;
        temp.publish(&index).await?;

        debug!("stored action {} -> {} ({} bytes)", action_id, output_id, size);
        Ok(object)
    }
}

#[async_trait]
impl Storage for DiskStore {
    fn kind(&self) -> &'static str {
        "disk"
    }

    async fn start(&self) -> CacheResult<()> {
        info!("[{}] local cache in {}", self.kind(), self.dir.display());
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            CacheError::io(format!("creating cache directory {}", self.dir.display()), e)
        })
    }

    async fn get(&self, action_id: &str) -> CacheResult<Lookup> {
        self.counters.get();
        let result = self.lookup(action_id).await;
        match &result {
            Ok(lookup) if lookup.is_miss() => self.counters.miss(),
            Ok(_) => self.counters.hit(),
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
    ) -> CacheResult<PathBuf> {
        self.counters.put();
        let result = self.store(action_id, output_id, size, body).await;
        if result.is_err() {
            self.counters.put_error();
        }
        result
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }

    fn summary(&self) -> String {
        self.counters.summary(self.kind())
    }
}

/// Temporary file that is deleted on drop unless it was published
struct TempFile {
    path: PathBuf,
    published: bool,
}

impl TempFile {
    fn beside(dest: &Path) -> Self {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: dest.with_file_name(format!("{}.{}.tmp", name, Uuid::new_v4().simple())),
            published: false,
        }
    }

    /// Atomically move the finished file to `dest`
    async fn publish(mut self, dest: &Path) -> CacheResult<()> {
        fs::rename(&self.path, dest).await.map_err(|e| {
            CacheError::io(
                format!("renaming {} to {}", self.path.display(), dest.display()),
                e,
            )
        })?;
        self.published = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Copy `body` into a fresh temporary file next to `dest`
async fn write_temp(dest: &Path, body: Body<'_>) -> CacheResult<(TempFile, u64)> {
    let temp = TempFile::beside(dest);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp.path)
        .await
        .map_err(|e| CacheError::io(format!("creating {}", temp.path.display()), e))?;

    let wrote = tokio::io::copy(body, &mut file)
        .await
        .map_err(|e| CacheError::io(format!("writing {}", temp.path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| CacheError::io(format!("flushing {}", temp.path.display()), e))?;

    Ok((temp, wrote))
}
