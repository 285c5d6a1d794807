//! Protocol engine
//!
//! Sends the handshake, starts the store, then serves every decoded request
//! on its own task. Responses are written as single JSON lines in whatever
//! order the tasks finish.

use crate::error::{CacheError, CacheResult};
use crate::protocol::reader::{self, REQUEST_QUEUE};
use crate::protocol::wire::{Command, Request, Response};
use crate::storage::Storage;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Serializes response lines onto the output stream
struct ResponseWriter<W> {
    out: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> ResponseWriter<W> {
    fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    async fn send(&self, response: &Response) -> CacheResult<()> {
        let mut line = serde_json::to_vec(response)?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| CacheError::io("writing response", e))?;
        out.flush()
            .await
            .map_err(|e| CacheError::io("flushing response", e))
    }
}

enum Next {
    Request(Request),
    Fatal(CacheError),
    Done,
}

/// GOCACHEPROG server over a [`Storage`]
pub struct Engine<S> {
    store: S,
    closed: OnceCell<Result<(), Arc<CacheError>>>,
}

impl<S: Storage + 'static> Engine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            closed: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Serve requests from `input` until end of input, a fatal stream error,
    /// or cancellation of `cancel`
    ///
    /// The store is closed exactly once and every in-flight request has
    /// answered before this returns.
    pub async fn run<R, W>(
        self: Arc<Self>,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> CacheResult<()>
    where
        R: Read + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = cancel.child_token();
        let writer = Arc::new(ResponseWriter::new(output));

        writer.send(&Response::handshake()).await?;
        self.store.start().await?;

        let (tx, mut rx) = mpsc::channel(REQUEST_QUEUE);
        reader::spawn(input, tx)?;

        let mut tasks = JoinSet::new();
        let outcome = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => Next::Done,
                next = rx.recv() => match next {
                    Some(Ok(request)) => Next::Request(request),
                    Some(Err(e)) => Next::Fatal(e),
                    None => Next::Done,
                },
            };

            match next {
                Next::Request(request) => {
                    let engine = Arc::clone(&self);
                    let writer = Arc::clone(&writer);
                    let cancel = cancel.clone();
                    tasks.spawn(async move { engine.serve(request, &writer, &cancel).await });
                }
                Next::Fatal(e) => {
                    error!("{}", e);
                    cancel.cancel();
                    break Err(e);
                }
                Next::Done => break Ok(()),
            }

            while let Some(joined) = tasks.try_join_next() {
                log_panic(joined);
            }
        };

        // Failures were already logged by `close`
        let _ = self.close().await;

        while let Some(joined) = tasks.join_next().await {
            log_panic(joined);
        }

        outcome
    }

    /// Close the store once; later calls observe the first outcome
    pub async fn close(&self) -> CacheResult<()> {
        self.closed
            .get_or_init(|| async {
                let result = self.store.close().await.map_err(Arc::new);
                if let Err(e) = &result {
                    error!("cache stop failed: {}", e);
                }
                result
            })
            .await
            .clone()
            .map_err(CacheError::Shared)
    }

    async fn serve<W>(&self, request: Request, writer: &ResponseWriter<W>, cancel: &CancellationToken)
    where
        W: AsyncWrite + Unpin + Send,
    {
        debug!(
            "request {} {} (action {})",
            request.id,
            request.command.as_str(),
            hex::encode(&request.action_id)
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            result = self.handle(&request) => result,
        };
        let response = result.unwrap_or_else(|e| {
            debug!("request {} failed: {}", request.id, e);
            Response::failure(request.id, e)
        });

        if let Err(e) = writer.send(&response).await {
            warn!("dropping response {}: {}", request.id, e);
        }
    }

    async fn handle(&self, request: &Request) -> CacheResult<Response> {
        match &request.command {
            Command::Get => self.handle_get(request).await,
            Command::Put => self.handle_put(request).await,
            Command::Close => {
                self.close().await?;
                Ok(Response::new(request.id))
            }
            Command::Unknown(name) => Err(CacheError::UnknownCommand(name.clone())),
        }
    }

    async fn handle_get(&self, request: &Request) -> CacheResult<Response> {
        let mut response = Response::new(request.id);

        let lookup = self.store.get(&hex::encode(&request.action_id)).await?;
        if lookup.is_miss() {
            response.miss = true;
            return Ok(response);
        }
        if lookup.output_id.is_empty() {
            return Err(CacheError::NoOutputId);
        }
        let output_id = hex::decode(&lookup.output_id)?;

        // Without a local copy there is nothing the build tool can read
        let Some(path) = lookup.disk_path else {
            response.miss = true;
            return Ok(response);
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                response.miss = true;
                return Ok(response);
            }
            Err(e) => return Err(CacheError::io(format!("stat {}", path.display()), e)),
        };
        if !meta.is_file() {
            return Err(CacheError::NotRegularFile(path));
        }

        response.output_id = output_id;
        response.size = i64::try_from(meta.len()).unwrap_or(i64::MAX);
        response.disk_path = path.to_string_lossy().into_owned();
        Ok(response)
    }

    async fn handle_put(&self, request: &Request) -> CacheResult<Response> {
        let size = u64::try_from(request.body_size)
            .map_err(|_| CacheError::NegativeBodySize(request.body_size))?;
        let action_id = hex::encode(&request.action_id);
        let output_id = hex::encode(request.output_id());

        let mut body = request.body.as_slice();
        let path = self
            .store
            .put(&action_id, &output_id, size, &mut body)
            .await
            .inspect_err(|e| {
                warn!(
                    "put(action {}, obj {}, {} bytes): {}",
                    action_id, output_id, size, e
                )
            })?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| CacheError::io("stat after successful put", e))?;
        if meta.len() != size {
            return Err(CacheError::SizeMismatch {
                disk: meta.len(),
                wanted: request.body_size,
            });
        }

        let mut response = Response::new(request.id);
        response.disk_path = path.to_string_lossy().into_owned();
        Ok(response)
    }
}

fn log_panic(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("request handler panicked: {}", e);
        }
    }
}
