//! Bidirectional byte relay between two duplex streams
//!
//! The relay runs one copy task per direction. End-of-stream on a source
//! propagates a write-side shutdown on its destination so the opposite
//! direction can still flush buffered data; the pipe resolves only once
//! both directions have finished.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Bytes moved in each direction by a completed pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeSummary {
    /// Bytes copied from the first stream to the second
    pub a_to_b: u64,
    /// Bytes copied from the second stream to the first
    pub b_to_a: u64,
}

/// Shuttle bytes between two duplex streams until both directions end.
///
/// A direction that errors half-closes its destination like a normal
/// end-of-stream; the opposite direction keeps running until its own
/// source ends.
pub async fn pipe<A, B>(a: A, b: B) -> io::Result<PipeSummary>
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
        copied
    });
    let backward = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
        copied
    });

    // Both directions must finish before the halves (and with them the
    // underlying streams) are dropped.
    let (forward, backward) = tokio::join!(forward, backward);
    let a_to_b = forward.map_err(io::Error::other)??;
    let b_to_a = backward.map_err(io::Error::other)??;

    Ok(PipeSummary { a_to_b, b_to_a })
}

/// A duplex stream with bytes that were already read off the wire.
///
/// Frame decoding may buffer past the last frame boundary; wrapping the
/// stream keeps those bytes at the front of the read side instead of
/// losing them to the codec.
#[derive(Debug)]
pub struct Rewound<S> {
    head: Bytes,
    inner: S,
}

impl<S> Rewound<S> {
    /// Wrap `inner`, serving `head` before any fresh reads
    pub fn new(head: Bytes, inner: S) -> Self {
        Self { head, inner }
    }

    /// Shared access to the wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unwrap, discarding any unserved head bytes
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewound<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.head.is_empty() {
            let n = this.head.len().min(buf.remaining());
            buf.put_slice(&this.head[..n]);
            this.head.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewound<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pipe_half_close_flushes_late_writer() {
        let (mut client, near) = tokio::io::duplex(64);
        let (far, mut server) = tokio::io::duplex(64);

        let relay = tokio::spawn(pipe(near, far));

        // Client speaks and closes its write side.
        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        // The server observes the request and the propagated half-close...
        let mut request = Vec::new();
        server.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"hello");

        // ...and can still answer on the opposite direction afterwards.
        server.write_all(b"goodbye").await.unwrap();
        server.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"goodbye");

        let summary = relay.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, 5);
        assert_eq!(summary.b_to_a, 7);
    }

    #[tokio::test]
    async fn test_pipe_symmetric_traffic() {
        let (mut client, near) = tokio::io::duplex(16);
        let (far, mut server) = tokio::io::duplex(16);

        let relay = tokio::spawn(pipe(near, far));

        let payload = vec![0xA5u8; 4096];
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client.shutdown().await.unwrap();
            let mut echoed = Vec::new();
            client.read_to_end(&mut echoed).await.unwrap();
            echoed
        });

        // Echo everything back through the pipe.
        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        server.write_all(&bytes).await.unwrap();
        server.shutdown().await.unwrap();

        assert_eq!(writer.await.unwrap(), expected);
        let summary = relay.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, 4096);
        assert_eq!(summary.b_to_a, 4096);
    }

    #[tokio::test]
    async fn test_rewound_serves_head_first() {
        let (near, mut far) = tokio::io::duplex(64);
        far.write_all(b" world").await.unwrap();
        far.shutdown().await.unwrap();

        let mut stream = Rewound::new(Bytes::from_static(b"hello"), near);
        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, b"hello world");
    }

    #[tokio::test]
    async fn test_rewound_writes_pass_through() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut stream = Rewound::new(Bytes::new(), near);

        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut seen = Vec::new();
        far.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"ping");
    }
}
