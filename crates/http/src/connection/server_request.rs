use std::io;
use std::net::SocketAddr;

use futures::channel::oneshot;
use http::{HeaderMap, Method, Uri, Version};
use tracing::{debug, warn};

use crate::codec::PayloadDecoder;
use crate::connection::http_connection::Conn;
use crate::connection::io::ConnRead;
use crate::protocol::body::ReqBody;
use crate::protocol::{HttpError, RequestHeader, Response, SendError, connection_has_token};

/// How an in-flight request ended. Hands the connection back to its loop.
#[derive(Debug)]
pub(crate) enum Done {
    Responded { conn: Conn, payload: PayloadDecoder, keep_alive: bool },
    Failed,
    Dropped(Conn),
}

/// A request read from a connection, waiting for its response.
///
/// The connection is parked until [`respond`](Self::respond) is called or
/// the request is dropped; a dropped request is answered with
/// `500 Internal Server Error` and its connection is closed.
#[derive(Debug)]
pub struct ServerRequest {
    head: RequestHeader,
    payload: PayloadDecoder,
    content_length: Option<u64>,
    keep_alive: bool,
    conn_id: u64,
    remote_addr: Option<SocketAddr>,
    conn: Option<Conn>,
    done: Option<oneshot::Sender<Done>>,
}

impl ServerRequest {
    pub(crate) fn new(head: RequestHeader, payload: PayloadDecoder, conn: Conn, done: oneshot::Sender<Done>) -> Self {
        Self {
            content_length: if payload.is_chunked() { None } else { payload.remaining() },
            keep_alive: head.is_keep_alive(),
            head,
            payload,
            conn_id: conn.id,
            remote_addr: conn.remote_addr,
            conn: Some(conn),
            done: Some(done),
        }
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn head(&self) -> &RequestHeader {
        &self.head
    }

    /// Declared body length; `None` for chunked bodies, `Some(0)` when
    /// there is no body.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the connection stays open after this request.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Id of the connection this request arrived on, unique per server.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The request body. Whatever the handler leaves unread is drained
    /// before the next request on the connection is parsed.
    pub fn body(&mut self) -> ReqBody<'_, ConnRead> {
        ReqBody::new(self.conn.as_mut().map(|conn| &mut conn.reader), &mut self.payload)
    }

    /// Writes `response` and releases the connection for its next request.
    ///
    /// A `connection: close` header on the response ends the connection
    /// after it is written. On failure the connection is closed and the
    /// error returned.
    pub async fn respond(mut self, response: Response) -> Result<(), HttpError> {
        let done = self.done.take();
        let Some(mut conn) = self.conn.take() else {
            return Err(SendError::io(io::Error::from(io::ErrorKind::NotConnected)).into());
        };

        let keep_alive = self.keep_alive && !connection_has_token(response.headers(), "close");
        match conn.writer.send_response(response, self.head.version(), keep_alive).await {
            Ok(()) => {
                let payload = std::mem::replace(&mut self.payload, PayloadDecoder::empty());
                if let Some(done) = done {
                    let _ = done.send(Done::Responded { conn, payload, keep_alive });
                }
                Ok(())
            }
            Err(e) => {
                warn!(conn_id = self.conn_id, cause = %e, "failed to send response, closing connection");
                conn.handle.close();
                if let Some(done) = done {
                    let _ = done.send(Done::Failed);
                }
                Err(e.into())
            }
        }
    }
}

impl Drop for ServerRequest {
    fn drop(&mut self) {
        if let (Some(done), Some(conn)) = (self.done.take(), self.conn.take()) {
            debug!(conn_id = self.conn_id, "request dropped without a response");
            let _ = done.send(Done::Dropped(conn));
        }
    }
}
