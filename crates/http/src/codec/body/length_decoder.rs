//! Decoder for bodies framed by a Content-Length header, as defined in
//! [RFC 7230 Section 3.3.2](https://tools.ietf.org/html/rfc7230#section-3.3.2).

use std::cmp;

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, Bytes};

/// Hands out exactly `length` bytes, then `Eof`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// The number of bytes remaining to be read from the payload
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn remaining(&self) -> u64 {
        self.length
    }

    pub fn is_finish(&self) -> bool {
        self.length == 0
    }

    /// Takes up to the remaining length out of `src`, advancing it.
    ///
    /// Returns `Ok(None)` when `src` is empty and more bytes are needed.
    pub fn decode(&mut self, src: &mut &[u8]) -> Result<Option<PayloadItem>, ParseError> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // src.len() fits in usize, so the minimum does as well
        let len = cmp::min(self.length, src.len() as u64) as usize;
        let bytes = Bytes::copy_from_slice(&src[..len]);
        src.advance(len);

        self.length -= len as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}
