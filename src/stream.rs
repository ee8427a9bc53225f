//! Streaming support types.
//!
//! [`ByteStream`] is the single-pass body handed out by the transport
//! adapter. It owns an optional release hook that runs exactly once, either
//! through an explicit [`ByteStream::cancel`] or when the stream is dropped.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

use crate::client::ClientError;

type ReleaseHook = Box<dyn FnOnce() -> Result<(), ClientError> + Send>;

/// A single-pass stream of body chunks.
pub struct ByteStream {
    inner: Option<BoxStream<'static, Result<Bytes, ClientError>>>,
    on_release: Option<ReleaseHook>,
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
            on_release: None,
        }
    }

    /// A stream yielding `bytes` as one chunk.
    pub fn once(bytes: Bytes) -> Self {
        Self::new(stream::once(async move { Ok(bytes) }))
    }

    /// Attach a hook invoked when the stream is released. Errors returned by
    /// the hook are logged and dropped.
    pub fn with_release_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), ClientError> + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Stop reading and hand the underlying resources back to the transport.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub fn cancel(&mut self) {
        self.inner = None;
        if let Some(hook) = self.on_release.take() {
            if let Err(e) = hook() {
                debug!(error = %e, "ignoring failure while releasing body stream");
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Drain the remaining chunks into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes, ClientError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.cancel();
        Ok(buffer.freeze())
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(inner) => inner.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("released", &self.is_released())
            .finish()
    }
}
