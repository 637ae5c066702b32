//! Connection handling.
//!
//! [`HttpConnection`] turns one transport into a sequence of
//! [`ServerRequest`]s. Each request owns the connection's reader and writer
//! while it is in flight and hands them back once it is answered or
//! dropped, so the next request is never parsed before the previous
//! response is written.

mod http_connection;
mod io;
mod message_writer;
mod server_request;

pub use http_connection::HttpConnection;
pub use io::{BoxTransport, ConnRead, TrackedIo, Transport};
pub use server_request::ServerRequest;

pub(crate) use http_connection::ConnEvent;
pub(crate) use io::ConnHandle;
