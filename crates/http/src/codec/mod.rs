//! HTTP/1.1 codecs.
//!
//! Request side: [`HeaderDecoder`] turns the buffered head into a
//! [`RequestHeader`](crate::protocol::RequestHeader) and a
//! [`PayloadSize`](crate::protocol::PayloadSize), then a [`PayloadDecoder`]
//! takes the body out of the same window.
//!
//! Response side: [`ResponseEncoder`] writes the head and frames the body
//! with Content-Length or chunked transfer encoding.

mod body;
mod header;
mod response_encoder;

pub use body::{ChunkedDecoder, PayloadDecoder, PayloadEncoder, is_chunked};
pub use header::{DecodedHead, HeaderDecoder, HeaderEncoder};
pub use response_encoder::{ResponseEncoder, ResponseHead};
