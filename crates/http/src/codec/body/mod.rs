//! HTTP body codecs.
//!
//! Decoders work over the connection's buffered window: each call takes a
//! `&mut &[u8]`, advances it past the bytes it used and hands back owned
//! chunks, so the caller only has to consume that many bytes from its
//! reader. Encoders follow `tokio_util`'s [`Encoder`](tokio_util::codec::Encoder)
//! and write into a `BytesMut`.
//!
//! - [`PayloadDecoder`] picks between [`ChunkedDecoder`] and a Content-Length decoder
//! - [`PayloadEncoder`] does the same for response bodies

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use chunked_decoder::{ChunkedDecoder, is_chunked};
pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
