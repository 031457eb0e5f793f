use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::timestamp::{Clock, Timestamp};

/// Transport wrapper that stamps the first non-empty read: the first byte of
/// the response, since HTTP/1.1 servers stay silent until the request is in.
pub struct FirstByteIo<T> {
    inner: T,
    clock: Arc<dyn Clock>,
    seen: Arc<AtomicU64>,
}

/// Read side of the stamp, kept by the probe after the transport is handed
/// to the HTTP connection.
#[derive(Debug, Clone)]
pub struct FirstByteMarker(Arc<AtomicU64>);

impl FirstByteMarker {
    pub fn get(&self) -> Option<Timestamp> {
        let ts = Timestamp::from_nanos(self.0.load(Ordering::Acquire));
        ts.is_set().then_some(ts)
    }
}

impl<T> FirstByteIo<T> {
    pub fn new(inner: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn marker(&self) -> FirstByteMarker {
        FirstByteMarker(self.seen.clone())
    }

    fn stamp(&self) {
        if self.seen.load(Ordering::Acquire) == 0 {
            let now = self.clock.now().as_nanos();
            let _ = self
                .seen
                .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire);
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for FirstByteIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            if buf.filled().len() > before {
                self.stamp();
            }
        }
        polled
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for FirstByteIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
