//! Stream wrapper that forces short reads and writes.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wraps a stream so each read and write moves at most `step` bytes.
///
/// With `stall` enabled every other poll first returns `Pending` after
/// waking itself, so callers are also exercised across cancellation points.
#[derive(Debug)]
pub struct TrickleStream<T> {
    inner: T,
    step: usize,
    stall: bool,
    stalled_read: bool,
    stalled_write: bool,
}

impl<T> TrickleStream<T> {
    /// Cap every operation on `inner` at `step` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero.
    pub fn new(inner: T, step: usize) -> Self {
        assert!(step > 0, "trickle step must be non-zero");
        Self {
            inner,
            step,
            stall: false,
            stalled_read: false,
            stalled_write: false,
        }
    }

    /// Also yield `Pending` on alternate polls.
    #[must_use]
    pub fn with_stalls(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn into_inner(self) -> T { self.inner }
}

fn stall_once(enabled: bool, stalled: &mut bool, cx: &Context<'_>) -> bool {
    if !enabled {
        return false;
    }
    *stalled = !*stalled;
    if *stalled {
        cx.waker().wake_by_ref();
    }
    *stalled
}

impl<T: AsyncRead + Unpin> AsyncRead for TrickleStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if stall_once(this.stall, &mut this.stalled_read, cx) {
            return Poll::Pending;
        }
        let mut scratch = vec![0; this.step.min(buf.remaining())];
        let mut limited = ReadBuf::new(&mut scratch);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        buf.put_slice(limited.filled());
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrickleStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if stall_once(this.stall, &mut this.stalled_write, cx) {
            return Poll::Pending;
        }
        let len = buf.len().min(this.step);
        Pin::new(&mut this.inner).poll_write(cx, &buf[..len])
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
