//! Sources of incoming connections.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Something connections can be accepted from.
///
/// `poll_accept` returning `Ready(None)` means no more connections will
/// come; the server then finishes once its open connections are done.
pub trait Listener {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<(Self::Io, Option<SocketAddr>)>>>;
}

impl Listener for TcpListener {
    type Io = TcpStream;

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<(Self::Io, Option<SocketAddr>)>>> {
        TcpListener::poll_accept(self, cx).map(|result| Some(result.map(|(stream, addr)| (stream, Some(addr)))))
    }
}

/// Adapts a stream of transports, such as a TLS acceptor or an in-memory
/// fake, into a [`Listener`].
#[derive(Debug)]
pub struct StreamListener<S> {
    inner: S,
}

impl<S> StreamListener<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, T> Listener for StreamListener<S>
where
    S: Stream<Item = io::Result<T>> + Unpin,
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Io = T;

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<(Self::Io, Option<SocketAddr>)>>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|item| item.map(|result| result.map(|io| (io, None))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::poll_fn;

    #[tokio::test]
    async fn stream_listener_yields_transports() {
        let (_client, server) = tokio::io::duplex(16);
        let mut listener = StreamListener::new(futures::stream::iter(vec![Ok::<_, io::Error>(server)]));

        let (_io, addr) = poll_fn(|cx| listener.poll_accept(cx)).await.unwrap().unwrap();
        assert!(addr.is_none());
        assert!(poll_fn(|cx| listener.poll_accept(cx)).await.is_none());
    }

    #[tokio::test]
    async fn tcp_listener_reports_peer() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();

        let (_io, peer) = poll_fn(|cx| Listener::poll_accept(&mut listener, cx)).await.unwrap().unwrap();
        assert_eq!(peer, Some(client.local_addr().unwrap()));
    }
}
