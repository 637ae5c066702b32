//! Core HTTP protocol types.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`], the
//!   units the codecs exchange
//! - [`RequestHeader`]: a parsed request head
//! - [`Response`] and [`ResponseBody`]: what a handler answers with
//! - [`body::ReqBody`]: the streaming request body
//! - [`HttpError`], [`ParseError`], [`SendError`]: error types

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub(crate) use request::connection_has_token;
pub use request::RequestHeader;

mod response;
pub(crate) use response::validate_trailers;
pub use response::{BoxError, Response, ResponseBody, TrailerFn};

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
