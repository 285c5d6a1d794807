//! Request stream decoding
//!
//! Decoding is blocking, so it runs on a dedicated thread and hands complete
//! requests (with their bodies attached) to the engine over a bounded channel.

use crate::error::{CacheError, CacheResult};
use crate::protocol::wire::{base64_bytes, Command, Request};
use serde_json::Value;
use std::io::{BufReader, Read};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::debug;

/// Requests buffered between the decoder thread and the engine
pub const REQUEST_QUEUE: usize = 64;

/// Start decoding `input` on its own thread
///
/// The thread stops at end of input, after sending a fatal error, or once
/// the receiving side is gone.
pub fn spawn<R>(input: R, tx: mpsc::Sender<CacheResult<Request>>) -> CacheResult<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("gocache-requests".to_string())
        .spawn(move || decode_stream(input, tx))
        .map_err(|e| CacheError::io("spawning request reader", e))
}

fn decode_stream<R: Read>(input: R, tx: mpsc::Sender<CacheResult<Request>>) {
    let mut values = serde_json::Deserializer::from_reader(BufReader::new(input)).into_iter::<Value>();

    loop {
        let next = match next_request(&mut values) {
            Ok(Some(request)) => Ok(request),
            Ok(None) => {
                debug!("request stream ended");
                return;
            }
            Err(e) => Err(e),
        };

        let stop = matches!(&next, Err(e) if e.is_fatal());
        if tx.blocking_send(next).is_err() || stop {
            return;
        }
    }
}

/// Decode the next request, reading the body value that follows a
/// non-empty put
///
/// Returns `Ok(None)` at a clean end of input.
pub fn next_request<I>(values: &mut I) -> CacheResult<Option<Request>>
where
    I: Iterator<Item = serde_json::Result<Value>>,
{
    let Some(value) = values.next() else {
        return Ok(None);
    };
    let value = value.map_err(|e| CacheError::Framing(e.to_string()))?;
    let mut request: Request = serde_json::from_value(value)
        .map_err(|e| CacheError::Framing(format!("decoding request: {}", e)))?;

    if request.command == Command::Put && request.body_size > 0 {
        let body = values
            .next()
            .ok_or_else(|| {
                CacheError::Framing(format!("missing body for put request {}", request.id))
            })?
            .map_err(|e| CacheError::Framing(format!("reading body: {}", e)))?;

        let bytes = decode_body(body)?;
        if i64::try_from(bytes.len()).ok() != Some(request.body_size) {
            return Err(CacheError::BodyLength {
                got: bytes.len(),
                declared: request.body_size,
            });
        }
        request.body = bytes;
    }

    Ok(Some(request))
}

fn decode_body(value: Value) -> CacheResult<Vec<u8>> {
    match value {
        Value::String(encoded) => base64_bytes::decode(&encoded)
            .map_err(|e| CacheError::Framing(format!("decoding body: {}", e))),
        Value::Null => Ok(Vec::new()),
        other => Err(CacheError::Framing(format!(
            "expected base64 body, got {}",
            other
        ))),
    }
}
