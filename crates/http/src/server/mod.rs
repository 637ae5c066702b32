//! Accepting connections and fanning their requests into one stream.

mod listener;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{BoxStream, SelectAll};
use futures::{Stream, StreamExt};
use tokio::time::Sleep;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

pub use listener::{Listener, StreamListener};

use crate::config::ServerConfig;
use crate::connection::{BoxTransport, ConnEvent, ConnHandle, HttpConnection, ServerRequest};
use crate::handler::{Handler, dispatch};

/// An HTTP/1.1 server: a [`Stream`] of the requests of every accepted
/// connection.
///
/// Each poll accepts every connection that is ready before it polls the
/// open connections. Requests of one connection arrive in order, one at a
/// time; requests of different connections interleave freely. The stream
/// ends once the listener is exhausted or closed and every connection has
/// finished.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use micro_httpd::Server;
/// use micro_httpd::protocol::Response;
/// use tokio::net::TcpListener;
///
/// # async fn run() -> std::io::Result<()> {
/// let mut server = Server::new(TcpListener::bind("127.0.0.1:8080").await?);
/// while let Some(request) = server.next().await {
///     tokio::spawn(request.respond(Response::ok().body("hello")));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Server<L> {
    listener: Option<L>,
    connections: SelectAll<BoxStream<'static, ConnEvent>>,
    tracked: HashMap<u64, ConnHandle>,
    next_id: u64,
    backoff: Option<Pin<Box<Sleep>>>,
    delay: Duration,
    shutdown: CancellationToken,
    shutdown_signal: Pin<Box<WaitForCancellationFutureOwned>>,
    config: ServerConfig,
}

impl<L> fmt::Debug for Server<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listening", &self.listener.is_some())
            .field("connections", &self.tracked.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: Listener> Server<L> {
    pub fn new(listener: L) -> Self {
        Self::with_config(listener, ServerConfig::default())
    }

    pub fn with_config(listener: L, mut config: ServerConfig) -> Self {
        config.accept_backoff = config.accept_backoff.normalized();
        let shutdown = CancellationToken::new();
        Self {
            listener: Some(listener),
            connections: SelectAll::new(),
            tracked: HashMap::new(),
            next_id: 1,
            backoff: None,
            delay: config.accept_backoff.initial_delay,
            shutdown_signal: Box::pin(shutdown.clone().cancelled_owned()),
            shutdown,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.tracked.len()
    }

    /// A token that closes the server, as [`close`](Self::close) does,
    /// when cancelled. The server notices on its next poll.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops accepting and force-closes every open connection.
    ///
    /// Requests already handed out fail to respond; the stream ends once
    /// their connections have wound down.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            info!(connections = self.tracked.len(), "closing server");
        }
        self.backoff = None;
        for handle in self.tracked.values() {
            handle.close();
        }
    }

    /// Serves every request with `handler` until the server ends.
    ///
    /// Requests run concurrently on the calling task. Handler errors are
    /// answered with `500 Internal Server Error`.
    pub async fn serve<H: Handler>(self, handler: H)
    where
        L: Unpin,
    {
        let handler = &handler;
        self.for_each_concurrent(None, move |request| dispatch(handler, request)).await;
    }

    fn track(&mut self, io: BoxTransport, remote_addr: Option<SocketAddr>) {
        let id = self.next_id;
        self.next_id += 1;

        let (connection, handle) = HttpConnection::tracked(id, io, remote_addr, &self.config);
        debug!(conn_id = id, ?remote_addr, "accepted connection");
        self.tracked.insert(id, handle);
        self.connections.push(connection.into_events());
    }

    /// Accepts until the listener has nothing ready.
    fn poll_accept_all(&mut self, cx: &mut Context<'_>) {
        loop {
            if let Some(sleep) = &mut self.backoff {
                if sleep.as_mut().poll(cx).is_pending() {
                    return;
                }
                self.backoff = None;
            }

            let Some(listener) = &mut self.listener else {
                return;
            };

            match listener.poll_accept(cx) {
                Poll::Pending => return,
                Poll::Ready(None) => {
                    info!("listener exhausted, no longer accepting");
                    self.listener = None;
                    return;
                }
                Poll::Ready(Some(Ok((io, remote_addr)))) => {
                    self.delay = self.config.accept_backoff.initial_delay;
                    self.track(Box::new(io), remote_addr);
                }
                Poll::Ready(Some(Err(e))) if is_transient(&e) => {
                    debug!(cause = %e, "transient accept error, retrying");
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!(cause = %e, delay = ?self.delay, "accept failed, backing off");
                    self.backoff = Some(Box::pin(tokio::time::sleep(self.delay)));
                    self.delay = self.config.accept_backoff.next(self.delay);
                }
            }
        }
    }
}

impl<L: Listener + Unpin> Stream for Server<L> {
    type Item = ServerRequest;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.listener.is_some() && this.shutdown_signal.as_mut().poll(cx).is_ready() {
            info!("shutdown requested");
            this.close();
        }

        this.poll_accept_all(cx);

        loop {
            match this.connections.poll_next_unpin(cx) {
                Poll::Ready(Some(ConnEvent::Request(request))) => return Poll::Ready(Some(request)),
                Poll::Ready(Some(ConnEvent::Closed(id))) => {
                    if let Some(handle) = this.tracked.remove(&id) {
                        debug!(conn_id = id, forced = handle.is_closed(), "connection closed");
                    }
                }
                Poll::Ready(None) | Poll::Pending => {
                    if this.listener.is_none() && this.connections.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Accept errors that concern one failed handshake rather than the
/// listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use crate::protocol::Response;

    type Accepts = mpsc::UnboundedSender<io::Result<DuplexStream>>;

    fn server() -> (Server<StreamListener<mpsc::UnboundedReceiver<io::Result<DuplexStream>>>>, Accepts) {
        let (tx, rx) = mpsc::unbounded();
        let config = ServerConfig::default().accept_backoff(crate::BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        });
        (Server::with_config(StreamListener::new(rx), config), tx)
    }

    fn connect(accepts: &Accepts) -> DuplexStream {
        let (client, server) = tokio::io::duplex(1024);
        accepts.unbounded_send(Ok(server)).unwrap();
        client
    }

    #[test]
    fn transient_kinds() {
        assert!(is_transient(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_transient(&io::ErrorKind::UnexpectedEof.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
    }

    #[tokio::test]
    async fn assigns_connection_ids() {
        let (mut server, accepts) = server();
        let mut first = connect(&accepts);
        let mut second = connect(&accepts);
        first.write_all(b"GET /a HTTP/1.1\r\n\r\n").await.unwrap();
        second.write_all(b"GET /b HTTP/1.1\r\n\r\n").await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let request = server.next().await.unwrap();
            ids.push((request.uri().path().to_owned(), request.conn_id()));
            request.respond(Response::ok()).await.unwrap();
        }
        ids.sort();
        assert_eq!(ids, [("/a".to_owned(), 1), ("/b".to_owned(), 2)]);
        assert_eq!(server.connection_count(), 2);
    }

    #[tokio::test]
    async fn backs_off_and_keeps_accepting() {
        let (mut server, accepts) = server();
        accepts.unbounded_send(Err(io::ErrorKind::ConnectionReset.into())).unwrap();
        accepts.unbounded_send(Err(io::Error::other("too many open files"))).unwrap();
        let mut client = connect(&accepts);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let request = server.next().await.unwrap();
        request.respond(Response::ok().body("up")).await.unwrap();

        let mut buf = vec![0u8; 40];
        let n = client.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn ends_when_listener_and_connections_finish() {
        let (mut server, accepts) = server();
        let mut client = connect(&accepts);
        drop(accepts);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let request = server.next().await.unwrap();
        request.respond(Response::ok()).await.unwrap();
        assert!(server.next().await.is_none());
        assert_eq!(server.connection_count(), 0);
    }
}
