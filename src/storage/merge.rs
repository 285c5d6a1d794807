//! Local disk store mirrored to a remote tier
//!
//! Reads are local first and fall back to the remote. Writes go to both
//! tiers at once: the remote upload reads the request body through a
//! [`TeeReader`] that copies each chunk into an in-process pipe, and the
//! local write drains the other end of that pipe.

use crate::error::{CacheError, CacheResult};
use crate::storage::tee::TeeReader;
use crate::storage::{Body, DiskStore, Lookup, RemoteStorage, Storage};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// Buffer between the remote upload and the local write
const PIPE_CAPACITY: usize = 64 * 1024;

/// Store backed by a local disk store and a remote tier
pub struct MergeStore<R> {
    local: DiskStore,
    remote: R,
}

impl<R: RemoteStorage> MergeStore<R> {
    pub fn new(local: DiskStore, remote: R) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &DiskStore {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }
}

#[async_trait]
impl<R: RemoteStorage> Storage for MergeStore<R> {
    fn kind(&self) -> &'static str {
        "merge-remote"
    }

    async fn start(&self) -> CacheResult<()> {
        if let Err(e) = self.local.start().await {
            let _ = self.local.close().await;
            return Err(CacheError::Start {
                tier: "local",
                source: Box::new(e),
            });
        }
        if let Err(e) = self.remote.start().await {
            let _ = self.remote.close().await;
            let _ = self.local.close().await;
            return Err(CacheError::Start {
                tier: "remote",
                source: Box::new(e),
            });
        }
        Ok(())
    }

    async fn get(&self, action_id: &str) -> CacheResult<Lookup> {
        let (local_path, local_err) = match self.local.get(action_id).await {
            Ok(lookup) if !lookup.output_id.is_empty() => return Ok(lookup),
            Ok(lookup) => (lookup.disk_path, None),
            Err(e) => (None, Some(e)),
        };

        match self.remote.get(action_id).await {
            Ok(Some(object)) if !object.output_id.is_empty() => {
                // Remote hits are not copied into the local tier here
                debug!(
                    "[{}] hit for action {} -> {}",
                    self.remote.kind(),
                    action_id,
                    object.output_id
                );
                Ok(Lookup {
                    output_id: object.output_id,
                    disk_path: local_path,
                })
            }
            Ok(_) => match local_err {
                Some(e) => Err(e),
                None => Ok(Lookup::miss()),
            },
            Err(remote_err) => match local_err {
                Some(e) => {
                    warn!("[{}] get failed too: {}", self.remote.kind(), remote_err);
                    Err(e)
                }
                None => Err(remote_err),
            },
        }
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Body<'_>,
    ) -> CacheResult<PathBuf> {
        let (remote_result, local_result) = if size == 0 {
            let (mut remote_body, mut local_body) = (tokio::io::empty(), tokio::io::empty());
            tokio::join!(
                self.remote.put(action_id, output_id, 0, &mut remote_body),
                self.local.put(action_id, output_id, 0, &mut local_body),
            )
        } else {
            let (mirror, pipe) = tokio::io::duplex(PIPE_CAPACITY);
            let upload = async {
                let mut tee = TeeReader::new(body, mirror);
                let result = self.remote.put(action_id, output_id, size, &mut tee).await;
                // Closing the pipe is what lets the local write finish
                tee.finish().await;
                result
            };
            // The pipe is dropped as soon as the local write gives up, which
            // detaches it from the tee instead of stalling the upload
            let write = async move {
                let mut pipe = pipe;
                self.local.put(action_id, output_id, size, &mut pipe).await
            };
            tokio::join!(upload, write)
        };

        remote_result?;
        local_result.map_err(|e| {
            error!("[{}] error: {}", self.local.kind(), e);
            e
        })
    }

    async fn close(&self) -> CacheResult<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.local.close().await {
            failures.push(CacheError::TierClose {
                tier: "local",
                source: Box::new(e),
            });
        }
        if let Err(e) = self.remote.close().await {
            failures.push(CacheError::TierClose {
                tier: "remote",
                source: Box::new(e),
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Close(failures))
        }
    }

    fn summary(&self) -> String {
        format!("\n{}\n{}", self.local.summary(), self.remote.summary())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::RemoteObject;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    /// In-memory remote tier for tests
    #[derive(Default)]
    pub(crate) struct MemoryRemote {
        pub objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
        pub fail_start: bool,
        pub fail_puts: bool,
        pub fail_close: bool,
        /// Bytes read per chunk with a yield in between, to interleave with
        /// concurrent readers
        pub chunk: Option<usize>,
        pub starts: AtomicUsize,
        pub closes: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStorage for MemoryRemote {
        fn kind(&self) -> &'static str {
            "memory"
        }

        async fn start(&self) -> CacheResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(CacheError::RemoteGet {
                    kind: "memory",
                    location: "memory://".to_string(),
                    reason: "unreachable".to_string(),
                });
            }
            Ok(())
        }

        async fn get(&self, action_id: &str) -> CacheResult<Option<RemoteObject>> {
            let objects = self.objects.lock().unwrap();
            Ok(objects.get(action_id).map(|(output_id, data)| RemoteObject {
                output_id: output_id.clone(),
                size: data.len() as u64,
                body: Some(Box::new(std::io::Cursor::new(data.clone()))),
            }))
        }

        async fn put(
            &self,
            action_id: &str,
            output_id: &str,
            _size: u64,
            body: Body<'_>,
        ) -> CacheResult<()> {
            let mut data = Vec::new();
            match self.chunk {
                Some(chunk) => {
                    let mut buf = vec![0u8; chunk];
                    loop {
                        let n = body
                            .read(&mut buf)
                            .await
                            .map_err(|e| CacheError::io("reading body", e))?;
                        if n == 0 {
                            break;
                        }
                        data.extend_from_slice(&buf[..n]);
                        tokio::task::yield_now().await;
                    }
                }
                None => {
                    body.read_to_end(&mut data)
                        .await
                        .map_err(|e| CacheError::io("reading body", e))?;
                }
            }
            if self.fail_puts {
                return Err(CacheError::RemotePut {
                    kind: "memory",
                    location: action_id.to_string(),
                    output_id: output_id.to_string(),
                    size: data.len() as u64,
                    reason: "injected failure".to_string(),
                });
            }
            self.objects
                .lock()
                .unwrap()
                .insert(action_id.to_string(), (output_id.to_string(), data));
            Ok(())
        }

        async fn close(&self) -> CacheResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(CacheError::Cancelled);
            }
            Ok(())
        }

        fn summary(&self) -> String {
            "[memory]".to_string()
        }
    }

    async fn merge_store(remote: MemoryRemote) -> (MergeStore<MemoryRemote>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = MergeStore::new(DiskStore::new(temp.path().join("cache")), remote);
        store.start().await.unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn local_start_failure_skips_remote() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let store = MergeStore::new(DiskStore::new(blocker.join("cache")), MemoryRemote::default());

        let err = store.start().await.unwrap_err();
        assert!(matches!(err, CacheError::Start { tier: "local", .. }));
        assert!(err.to_string().starts_with("local cache start failed"));
        assert_eq!(store.remote().starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_start_failure_closes_both_tiers() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote {
            fail_start: true,
            ..Default::default()
        };
        let store = MergeStore::new(DiskStore::new(temp.path().join("cache")), remote);

        let err = store.start().await.unwrap_err();
        assert!(matches!(err, CacheError::Start { tier: "remote", .. }));
        assert_eq!(store.remote().starts.load(Ordering::SeqCst), 1);
        assert_eq!(store.remote().closes.load(Ordering::SeqCst), 1);
        // The local tier started before the remote failed
        assert!(store.local().dir().is_dir());
    }

    #[tokio::test]
    async fn put_writes_both_tiers() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;

        let path = store
            .put("aa", "bb", 5, &mut &b"hello"[..])
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        let objects = store.remote().objects.lock().unwrap();
        assert_eq!(objects["aa"], ("bb".to_string(), b"hello".to_vec()));
    }

    #[tokio::test]
    async fn large_body_streams_through_pipe() {
        let data: Vec<u8> = (0..(3 * PIPE_CAPACITY + 17)).map(|i| (i % 13) as u8).collect();
        let (store, _temp) = merge_store(MemoryRemote::default()).await;

        let path = store
            .put("aa", "bb", data.len() as u64, &mut data.as_slice())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(store.remote().objects.lock().unwrap()["aa"].1, data);
    }

    #[tokio::test]
    async fn empty_put_skips_pipe() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;

        let path = store.put("cc", "dd", 0, &mut &b""[..]).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(store.get("cc").await.unwrap().output_id, "dd");
        assert!(store.remote().objects.lock().unwrap().contains_key("cc"));
    }

    #[tokio::test]
    async fn remote_failure_fails_put() {
        let remote = MemoryRemote {
            fail_puts: true,
            ..Default::default()
        };
        let (store, _temp) = merge_store(remote).await;

        let err = store
            .put("aa", "bb", 5, &mut &b"hello"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::RemotePut { .. }));
    }

    #[tokio::test]
    async fn local_failure_fails_put_after_remote_success() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let store = MergeStore::new(DiskStore::new(&blocker), MemoryRemote::default());

        let result = store.put("aa", "bb", 5, &mut &b"hello"[..]).await;
        assert!(result.is_err());
        // The remote keeps its copy
        assert!(store.remote().objects.lock().unwrap().contains_key("aa"));
    }

    #[tokio::test]
    async fn local_value_wins() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;
        store.local().put("aa", "bb", 1, &mut &b"x"[..]).await.unwrap();
        store
            .remote()
            .objects
            .lock()
            .unwrap()
            .insert("aa".to_string(), ("cc".to_string(), b"y".to_vec()));

        assert_eq!(store.get("aa").await.unwrap().output_id, "bb");
    }

    #[tokio::test]
    async fn remote_hit_is_not_written_back() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;
        store
            .remote()
            .objects
            .lock()
            .unwrap()
            .insert("aa".to_string(), ("cc".to_string(), b"y".to_vec()));

        let lookup = store.get("aa").await.unwrap();
        assert_eq!(lookup.output_id, "cc");
        assert_eq!(lookup.disk_path, None);
        assert!(!store.local().action_path("aa").exists());
    }

    #[tokio::test]
    async fn miss_in_both_tiers() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;
        assert!(store.get("aa").await.unwrap().is_miss());
    }

    #[tokio::test]
    async fn concurrent_get_never_sees_partial_object() {
        let data = vec![42u8; 4 * PIPE_CAPACITY];
        let remote = MemoryRemote {
            chunk: Some(4096),
            ..Default::default()
        };
        let (store, _temp) = merge_store(remote).await;
        let store = Arc::new(store);

        let writer = {
            let store = Arc::clone(&store);
            let data = data.clone();
            tokio::spawn(async move {
                store
                    .put("aa", "bb", data.len() as u64, &mut data.as_slice())
                    .await
                    .unwrap();
            })
        };

        while !writer.is_finished() {
            let lookup = store.get("aa").await.unwrap();
            if let Some(path) = lookup.disk_path.filter(|_| !lookup.output_id.is_empty()) {
                assert_eq!(std::fs::read(&path).unwrap().len(), data.len());
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let lookup = store.get("aa").await.unwrap();
        assert_eq!(std::fs::read(lookup.disk_path.unwrap()).unwrap(), data);
    }

    #[tokio::test]
    async fn close_reports_every_failure() {
        let remote = MemoryRemote {
            fail_close: true,
            ..Default::default()
        };
        let (store, _temp) = merge_store(remote).await;

        let err = store.close().await.unwrap_err();
        match err {
            CacheError::Close(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].to_string().contains("remote cache close failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.remote().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn summary_includes_both_tiers() {
        let (store, _temp) = merge_store(MemoryRemote::default()).await;
        let summary = store.summary();
        assert!(summary.contains("[disk]"));
        assert!(summary.contains("[memory]"));
    }
}
