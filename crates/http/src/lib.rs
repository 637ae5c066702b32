//! A small HTTP/1.1 server core built on tokio and [`micro_bufio`].
//!
//! The server is a [`Stream`](futures::Stream) of requests: a [`Server`]
//! accepts connections from a [`Listener`], reads one request at a time
//! from each, and yields them as [`ServerRequest`]s. Answering a request
//! with [`ServerRequest::respond`] writes the response and lets its
//! connection read the next one.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use micro_httpd::handler::Handler;
//! use micro_httpd::protocol::{BoxError, Response};
//! use micro_httpd::{Server, ServerRequest};
//! use tokio::net::TcpListener;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     type Error = BoxError;
//!
//!     async fn call(&self, req: &mut ServerRequest) -> Result<Response, BoxError> {
//!         let body = req.body().bytes().await?;
//!         Ok(Response::ok().body(format!("hello, {} bytes received\r\n", body.len())))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     Server::new(listener).serve(Hello).await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: request heads, responses, body types and errors
//! - [`codec`]: request head and body decoding, response encoding
//! - [`connection`]: the per-connection request loop
//! - [`server`]: the accept loop and the [`Listener`] abstraction
//! - [`handler`]: the [`Handler`](handler::Handler) trait
//!
//! # Connection lifecycle
//!
//! A connection reads a request head, hands the request out and waits for
//! it to be answered or dropped. Body bytes the handler left unread are
//! drained before the next head is read. A malformed head is answered with
//! `400 Bad Request`, a request dropped without a response with
//! `500 Internal Server Error`; both close the connection.
//!
//! # Limits
//!
//! Request heads are bounded by [`ServerConfig::max_header_bytes`] and the
//! read buffer size, header counts by [`ServerConfig::max_headers`]. HTTP/2
//! and TLS are out of scope; TLS can be layered in through
//! [`StreamListener`].

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;

mod config;
mod utils;

pub(crate) use utils::ensure;

pub use config::{BackoffConfig, ServerConfig};
pub use connection::{HttpConnection, ServerRequest};
pub use server::{Listener, Server, StreamListener};
