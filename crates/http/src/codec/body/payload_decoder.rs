//! Unified decoder for request bodies.
//!
//! The strategy is picked once from the request head: Content-Length,
//! chunked transfer encoding, or no body at all.

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, RequestHeader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// Decode payload with a fixed content length
    Length(LengthDecoder),

    /// Decode payload using chunked transfer encoding
    Chunked(ChunkedDecoder),

    /// Handle messages with no body
    NoBody,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    /// Picks the decoder for `header`, whose framing was already resolved
    /// into `payload_size`.
    pub fn for_request(header: &RequestHeader, payload_size: PayloadSize) -> Result<Self, ParseError> {
        Ok(match payload_size {
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self { kind: Kind::Chunked(ChunkedDecoder::from_headers(header.headers())?) },
            PayloadSize::Empty => Self::empty(),
        })
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(decoder) => decoder.is_finish(),
            Kind::Chunked(decoder) => decoder.is_finish(),
            Kind::NoBody => true,
        }
    }

    /// Bytes still expected, when the framing tells.
    pub fn remaining(&self) -> Option<u64> {
        match &self.kind {
            Kind::Length(decoder) => Some(decoder.remaining()),
            Kind::Chunked(decoder) if decoder.is_finish() => Some(0),
            Kind::Chunked(_) => None,
            Kind::NoBody => Some(0),
        }
    }

    pub fn decode(&mut self, src: &mut &[u8]) -> Result<Option<PayloadItem>, ParseError> {
        match &mut self.kind {
            Kind::Length(decoder) => decoder.decode(src),
            Kind::Chunked(decoder) => decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(value: PayloadSize) -> Self {
        match value {
            PayloadSize::Length(size) => Self::fix_length(size),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::Empty => Self::empty(),
        }
    }
}
