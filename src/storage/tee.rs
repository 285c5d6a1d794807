//! Duplicating reader for streaming one body into two tiers

use crate::storage::Body;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

/// Reader that forwards every byte it yields into `mirror`.
///
/// A read does not start until everything from the previous read has been
/// accepted by the mirror, so a slow mirror paces the primary reader. If the
/// mirror fails (its reading end went away) the tee keeps serving the primary
/// reader and stops mirroring.
pub(crate) struct TeeReader<'a, W> {
    inner: Body<'a>,
    mirror: Option<W>,
    pending: Vec<u8>,
}

impl<'a, W: AsyncWrite + Unpin> TeeReader<'a, W> {
    pub(crate) fn new(inner: Body<'a>, mirror: W) -> Self {
        Self {
            inner,
            mirror: Some(mirror),
            pending: Vec::new(),
        }
    }

    /// Hand any buffered bytes to the mirror, then close it so its reader
    /// sees end of stream.
    pub(crate) async fn finish(mut self) {
        std::future::poll_fn(|cx| self.poll_drain(cx)).await;
        if let Some(mut mirror) = self.mirror.take() {
            if let Err(e) = mirror.shutdown().await {
                debug!("closing mirror failed: {}", e);
            }
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        while !self.pending.is_empty() {
            let Some(mirror) = self.mirror.as_mut() else {
                self.pending.clear();
                break;
            };
            match Pin::new(mirror).poll_write(cx, &self.pending) {
                Poll::Ready(Ok(0)) => self.detach("mirror accepted no bytes"),
                Poll::Ready(Ok(n)) => {
                    self.pending.drain(..n);
                }
                Poll::Ready(Err(e)) => self.detach(&e.to_string()),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(())
    }

    fn detach(&mut self, reason: &str) {
        debug!("mirror detached: {}", reason);
        self.mirror = None;
        self.pending.clear();
    }
}

impl<W: AsyncWrite + Unpin> AsyncRead for TeeReader<'_, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx));

        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        if this.mirror.is_some() {
            this.pending.extend_from_slice(&buf.filled()[before..]);
            // Start mirroring now; whatever is left waits for the next read
            let _ = this.poll_drain(cx);
        }
        Poll::Ready(Ok(()))
    }
}
