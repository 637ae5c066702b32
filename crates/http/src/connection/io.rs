//! Transport wrapper that can be force-closed from outside the connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use micro_bufio::BufReader;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

/// Anything a connection can be served over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxTransport = Box<dyn Transport>;

/// The read half requests read their bodies from.
pub type ConnRead = ReadHalf<TrackedIo<BoxTransport>>;

pub(crate) type ConnReader = BufReader<ConnRead>;
pub(crate) type ConnWrite = WriteHalf<TrackedIo<BoxTransport>>;

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    read_waker: AtomicWaker,
    write_waker: AtomicWaker,
}

/// Closes the transport of one connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnHandle {
    shared: Arc<Shared>,
}

impl ConnHandle {
    /// Marks the transport closed and wakes whoever is parked on it.
    /// Closing twice is a no-op.
    pub(crate) fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.read_waker.wake();
            self.shared.write_waker.wake();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// An IO object whose reads and writes fail with `NotConnected` once its
/// [`ConnHandle`] is closed.
#[derive(Debug)]
pub struct TrackedIo<T> {
    inner: T,
    shared: Arc<Shared>,
}

impl<T> TrackedIo<T> {
    pub(crate) fn new(inner: T) -> (Self, ConnHandle) {
        let shared = Arc::new(Shared::default());
        (Self { inner, shared: Arc::clone(&shared) }, ConnHandle { shared })
    }

    fn check_open(&self, waker: &AtomicWaker, cx: &Context<'_>) -> io::Result<()> {
        waker.register(cx.waker());
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
        }
        Ok(())
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackedIo<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_open(&this.shared.read_waker, cx)?;
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackedIo<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.check_open(&this.shared.write_waker, cx)?;
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_open(&this.shared.write_waker, cx)?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.shared.closed.load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
