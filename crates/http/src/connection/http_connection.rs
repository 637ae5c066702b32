use std::fmt;
use std::net::SocketAddr;

use futures::channel::oneshot;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use http::{StatusCode, Version};
use tracing::{debug, info, trace, warn};

use crate::codec::{HeaderDecoder, PayloadDecoder};
use crate::config::ServerConfig;
use crate::connection::io::{BoxTransport, ConnHandle, ConnReader, ConnWrite, TrackedIo, Transport};
use crate::connection::message_writer::MessageWriter;
use crate::connection::server_request::{Done, ServerRequest};
use crate::handler::{Handler, dispatch};
use crate::protocol::body::ReqBody;
use crate::protocol::{ParseError, PayloadSize, RequestHeader, Response};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// The parts of a connection that travel with its in-flight request.
pub(crate) struct Conn {
    pub(crate) id: u64,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) reader: ConnReader,
    pub(crate) writer: MessageWriter<ConnWrite>,
    pub(crate) handle: ConnHandle,
    decoder: HeaderDecoder,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").field("id", &self.id).field("remote_addr", &self.remote_addr).finish_non_exhaustive()
    }
}

/// What a connection reports to whoever drives it.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    Request(ServerRequest),
    Closed(u64),
}

/// One HTTP/1.1 connection, read as a sequence of requests.
///
/// Requests are parsed one at a time: the next request head is read only
/// after the previous request was answered and whatever body it left
/// unread was drained.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use micro_httpd::ServerConfig;
/// use micro_httpd::connection::HttpConnection;
/// use micro_httpd::protocol::Response;
///
/// # async fn run(stream: tokio::net::TcpStream) {
/// let mut requests = std::pin::pin!(HttpConnection::new(stream, &ServerConfig::default()).requests());
/// while let Some(request) = requests.next().await {
///     let _ = request.respond(Response::ok().body("hello")).await;
/// }
/// # }
/// ```
pub struct HttpConnection {
    conn: Conn,
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HttpConnection").field(&self.conn).finish()
    }
}

impl HttpConnection {
    pub fn new<T: Transport>(io: T, config: &ServerConfig) -> Self {
        Self::tracked(0, Box::new(io), None, config).0
    }

    pub(crate) fn tracked(
        id: u64,
        io: BoxTransport,
        remote_addr: Option<SocketAddr>,
        config: &ServerConfig,
    ) -> (Self, ConnHandle) {
        let (io, handle) = TrackedIo::new(io);
        let (reader, writer) = tokio::io::split(io);
        let conn = Conn {
            id,
            remote_addr,
            reader: ConnReader::with_capacity(config.read_buffer_size, reader),
            writer: MessageWriter::with_capacity(writer, config.write_buffer_size),
            handle: handle.clone(),
            decoder: HeaderDecoder::new(config.max_headers, config.head_limit()),
        };
        (Self { conn }, handle)
    }

    /// The requests of this connection. The stream ends when the peer
    /// closes the connection, on a malformed request, or once a response
    /// ends the connection.
    pub fn requests(self) -> impl Stream<Item = ServerRequest> + Send + 'static {
        self.into_events().filter_map(|event| {
            futures::future::ready(match event {
                ConnEvent::Request(request) => Some(request),
                ConnEvent::Closed(_) => None,
            })
        })
    }

    /// Serves every request of this connection with `handler`, one after
    /// the other.
    pub async fn process<H: Handler>(self, handler: &H) {
        let id = self.conn.id;
        let mut requests = std::pin::pin!(self.requests());
        while let Some(request) = requests.next().await {
            dispatch(handler, request).await;
        }
        info!(conn_id = id, "connection finished");
    }

    pub(crate) fn into_events(self) -> BoxStream<'static, ConnEvent> {
        stream::unfold(State::Idle(self.conn), State::step).boxed()
    }
}

enum State {
    /// Ready to read the next request head.
    Idle(Conn),
    /// A request is out; the connection comes back through `rx`.
    Waiting { id: u64, rx: oneshot::Receiver<Done> },
    Closed,
}

impl State {
    async fn step(mut self) -> Option<(ConnEvent, State)> {
        loop {
            self = match self {
                State::Closed => return None,

                State::Idle(conn) => {
                    let id = conn.id;
                    return Some(match next_request(conn).await {
                        Some((request, rx)) => (ConnEvent::Request(request), State::Waiting { id, rx }),
                        None => (ConnEvent::Closed(id), State::Closed),
                    });
                }

                State::Waiting { id, rx } => match rx.await {
                    Ok(Done::Responded { mut conn, mut payload, keep_alive }) => {
                        if keep_alive && drain_body(&mut conn, &mut payload).await {
                            State::Idle(conn)
                        } else {
                            debug!(conn_id = id, "closing connection after response");
                            return Some((ConnEvent::Closed(id), State::Closed));
                        }
                    }
                    Ok(Done::Dropped(mut conn)) => {
                        send_error_response(&mut conn, StatusCode::INTERNAL_SERVER_ERROR).await;
                        conn.handle.close();
                        return Some((ConnEvent::Closed(id), State::Closed));
                    }
                    Ok(Done::Failed) | Err(_) => return Some((ConnEvent::Closed(id), State::Closed)),
                },
            };
        }
    }
}

/// Reads the next request head and hands the connection to the request.
async fn next_request(mut conn: Conn) -> Option<(ServerRequest, oneshot::Receiver<Done>)> {
    let (header, payload) = match read_request(&mut conn).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!(conn_id = conn.id, "connection closed by peer");
            return None;
        }
        Err(e) if e.is_bad_request() => {
            warn!(conn_id = conn.id, cause = %e, "bad request, closing connection");
            send_error_response(&mut conn, StatusCode::BAD_REQUEST).await;
            conn.handle.close();
            return None;
        }
        Err(e) => {
            debug!(conn_id = conn.id, cause = %e, "can't read next request");
            conn.handle.close();
            return None;
        }
    };

    if header.expects_continue() && !payload.is_empty() {
        if let Err(e) = conn.writer.write_raw(CONTINUE).await {
            debug!(conn_id = conn.id, cause = %e, "failed to send 100 continue");
            conn.handle.close();
            return None;
        }
        trace!(conn_id = conn.id, "receive expect request header, sent continue response");
    }

    trace!(conn_id = conn.id, method = %header.method(), uri = %header.uri(), "received request");
    let (tx, rx) = oneshot::channel();
    Some((ServerRequest::new(header, payload, conn, tx), rx))
}

async fn read_request(conn: &mut Conn) -> Result<Option<(RequestHeader, PayloadDecoder)>, ParseError> {
    let Some((header, payload_size)) = read_head(conn).await? else {
        return Ok(None);
    };
    let payload = PayloadDecoder::for_request(&header, payload_size)?;
    Ok(Some((header, payload)))
}

/// Grows the buffered window until it holds a whole request head.
async fn read_head(conn: &mut Conn) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
    let limit = conn.decoder.max_header_bytes();
    loop {
        if let Some((header, payload_size, consumed)) = conn.decoder.decode(conn.reader.buffer())? {
            conn.reader.consume(consumed);
            return Ok(Some((header, payload_size)));
        }

        let buffered = conn.reader.buffered();
        if buffered >= limit {
            return Err(ParseError::too_large_header(buffered, limit));
        }

        match conn.reader.peek(buffered + 1).await {
            Ok(Some(window)) if window.len() > buffered => {}
            // the peer hung up in the middle of a head
            Ok(Some(_)) => return Err(ParseError::UnexpectedEof),
            Ok(None) => return Ok(None),
            Err(e) if e.is_buffer_full() => return Err(ParseError::too_large_header(buffered, limit)),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Skips whatever body the handler left unread. Returns whether the
/// connection can carry another request.
async fn drain_body(conn: &mut Conn, payload: &mut PayloadDecoder) -> bool {
    match ReqBody::new(Some(&mut conn.reader), payload).drain().await {
        Ok(0) => true,
        Ok(skipped) => {
            trace!(conn_id = conn.id, skipped, "drained unread request body");
            true
        }
        Err(e) => {
            debug!(conn_id = conn.id, cause = %e, "failed to drain request body");
            false
        }
    }
}

/// Best effort: the connection is closed right after.
async fn send_error_response(conn: &mut Conn, status: StatusCode) {
    if let Err(e) = conn.writer.send_response(Response::new(status), Version::HTTP_11, false).await {
        debug!(conn_id = conn.id, cause = %e, "failed to send {status} response");
    }
}
