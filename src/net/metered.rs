//! Byte-counting transport wrapper.
//!
//! Every accepted stream is wrapped before it reaches hyper, so the
//! connection's cumulative counters reflect exactly what crossed the
//! socket, status lines and headers included.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::connection::ConnectionHandle;

/// Transport that reports reads, writes, flushes and close to a
/// [`ConnectionHandle`].
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    connection: Arc<ConnectionHandle>,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, connection: Arc<ConnectionHandle>) -> Self {
        Self { inner, connection }
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.connection.record_read(buf.filled().len() - before);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.connection.record_written(n);
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = poll {
            this.connection.record_written(n);
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = poll {
            if this.connection.has_flush_waiters() {
                this.connection.notify_flushed();
            }
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        self.connection.notify_closed();
    }
}

/// Best-effort local descriptor of a TCP stream.
#[cfg(unix)]
pub fn local_descriptor(stream: &tokio::net::TcpStream) -> Option<i64> {
    use std::os::unix::io::AsRawFd;
    Some(i64::from(stream.as_raw_fd()))
}

#[cfg(not(unix))]
pub fn local_descriptor(_stream: &tokio::net::TcpStream) -> Option<i64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn connection() -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new("127.0.0.1:5000".parse().unwrap(), Some(5)))
    }

    #[tokio::test]
    async fn counts_both_directions() {
        let (mut client, server) = tokio::io::duplex(1024);
        let conn = connection();
        let mut metered = MeteredStream::new(server, conn.clone());

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = metered.read(&mut buf).await.unwrap();
        assert_eq!(n, 18);

        metered.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        metered.flush().await.unwrap();

        assert_eq!(conn.bytes_read(), 18);
        assert_eq!(conn.bytes_written(), 19);
    }

    #[tokio::test]
    async fn flush_observes_all_written_bytes() {
        let (_client, server) = tokio::io::duplex(1024);
        let conn = connection();
        let mut metered = MeteredStream::new(server, conn.clone());

        let seen = Arc::new(AtomicU64::new(0));
        let s = seen.clone();
        let c = conn.clone();
        conn.when_flushed(Box::new(move || {
            s.store(c.bytes_written(), Ordering::SeqCst);
        }));

        metered.write_all(b"hello").await.unwrap();
        metered.flush().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn drop_fires_close_hooks() {
        let (_client, server) = tokio::io::duplex(64);
        let conn = connection();
        let closed = Arc::new(AtomicBool::new(false));
        let c = closed.clone();
        conn.on_close(Box::new(move || c.store(true, Ordering::SeqCst)));

        let metered = MeteredStream::new(server, conn.clone());
        assert!(!closed.load(Ordering::SeqCst));
        drop(metered);
        assert!(closed.load(Ordering::SeqCst));
    }
}
