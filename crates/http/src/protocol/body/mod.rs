//! Request body streaming.
//!
//! [`ReqBody`] borrows the connection's buffered reader while the request
//! is in flight and decodes the body straight out of its window. It
//! implements `http_body::Body`, so `http_body_util::BodyExt` works on it,
//! and [`ReqBody::into_async_read`] adapts it to `AsyncRead` for consumers
//! such as a multipart reader.
//!
//! Whatever the handler leaves unread is drained by the connection before
//! the next request is parsed.

mod req_body;

pub use req_body::ReqBody;
