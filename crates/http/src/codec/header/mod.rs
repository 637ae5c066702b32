//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`]: parses a request head out of a byte window with
//!   `httparse` and resolves its body framing
//! - [`HeaderEncoder`]: writes a status line and header block

mod header_decoder;
mod header_encoder;

pub use header_decoder::{DecodedHead, HeaderDecoder};
pub use header_encoder::HeaderEncoder;
