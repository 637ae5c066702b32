//! Decoder for HTTP chunked transfer encoding, as specified in
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1).
//!
//! The decoder is a byte level state machine, so it can resume at any point
//! of the framing when the window it decodes from runs dry.

use std::io;
use std::io::ErrorKind;
use std::task::Poll;

use bytes::{Buf, Bytes};
use http::HeaderMap;
use http::header::TRANSFER_ENCODING;
use tracing::trace;
use ChunkedState::*;

use crate::protocol::{ParseError, PayloadItem};

/// Decodes a chunked body. Chunk extensions and trailer fields are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0 }
    }

    /// Builds a decoder for a message whose Transfer-Encoding lists
    /// `chunked`, and refuses any other message.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ParseError> {
        if is_chunked(headers) {
            Ok(Self::new())
        } else {
            Err(ParseError::invalid_transfer_encoding("chunked is not listed in transfer-encoding"))
        }
    }

    pub fn is_finish(&self) -> bool {
        self.state == End
    }

    /// Runs the state machine over `src`, advancing it past every byte
    /// processed.
    ///
    /// Returns `Ok(None)` once `src` is exhausted without producing data.
    pub fn decode(&mut self, src: &mut &[u8]) -> Result<Option<PayloadItem>, ParseError> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(src, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => return Err(ParseError::invalid_body(e)),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether any comma separated Transfer-Encoding token is `chunked`,
/// ignoring case and surrounding whitespace.
pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .flat_map(|value| value.as_bytes().split(|b| *b == b','))
        .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the chunk size in hex
    Size,
    /// Handle whitespace after size
    SizeLws,
    /// Skip chunk extensions
    Extension,
    /// Read LF after chunk size
    SizeLf,
    /// Read chunk data
    Body,
    /// Read CR after chunk data
    BodyCr,
    /// Read LF after chunk data
    BodyLf,
    /// Read optional trailer fields
    Trailer,
    /// Read LF after trailer
    TrailerLf,
    /// Read final CR
    EndCr,
    /// Read final LF
    EndLf,
    /// Final state after reading last chunk
    End,
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.has_remaining() {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

fn invalid(msg: &'static str) -> Poll<Result<ChunkedState, io::Error>> {
    Poll::Ready(Err(io::Error::new(ErrorKind::InvalidInput, msg)))
}

impl ChunkedState {
    fn step(&self, src: &mut &[u8], remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, io::Error>> {
        match self {
            Size => ChunkedState::read_size(src, remaining_size),
            SizeLws => ChunkedState::read_size_lws(src),
            Extension => ChunkedState::read_extension(src),
            SizeLf => ChunkedState::read_size_lf(src, *remaining_size),
            Body => ChunkedState::read_body(src, remaining_size, buf),
            BodyCr => ChunkedState::read_body_cr(src),
            BodyLf => ChunkedState::read_body_lf(src),
            Trailer => ChunkedState::read_trailer(src),
            TrailerLf => ChunkedState::read_trailer_lf(src),
            EndCr => ChunkedState::read_end_cr(src),
            EndLf => ChunkedState::read_end_lf(src),
            End => Poll::Ready(Ok(End)),
        }
    }

    /// Accumulates hex digits of the chunk size.
    fn read_size(src: &mut &[u8], size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, io::Error>> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(val) => val,
                    None => return invalid("invalid overflow chunked length"),
                }
            };
        }

        let digit = match try_next_byte!(src) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b + 10 - b'a',
            b @ b'A'..=b'F' => b + 10 - b'A',
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            _ => return invalid("invalid chunk size line: Invalid Size"),
        };

        *size_per_chunk = or_overflow!(size_per_chunk.checked_mul(16));
        *size_per_chunk = or_overflow!(size_per_chunk.checked_add(u64::from(digit)));
        Poll::Ready(Ok(Size))
    }

    fn read_size_lws(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            // LWS can follow the chunk size, but no more digits can come
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => invalid("invalid chunk size linear white space"),
        }
    }

    fn read_extension(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        // extensions are ignored up to the next CRLF, a bare LF is rejected
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => invalid("invalid chunk extension contains newline"),
            _ => Poll::Ready(Ok(Extension)),
        }
    }

    fn read_size_lf(src: &mut &[u8], size_per_chunk: u64) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\n' if size_per_chunk == 0 => Poll::Ready(Ok(EndCr)),
            b'\n' => Poll::Ready(Ok(Body)),
            _ => invalid("invalid chunk size LF"),
        }
    }

    fn read_body(src: &mut &[u8], size_per_chunk: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, io::Error>> {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }

        if *size_per_chunk == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        // cap remaining bytes at the max capacity of usize
        let remaining = usize::try_from(*size_per_chunk).unwrap_or(usize::MAX);
        let read_size = std::cmp::min(remaining, src.len());

        *size_per_chunk -= read_size as u64;
        *buf = Some(Bytes::copy_from_slice(&src[..read_size]));
        src.advance(read_size);

        if *size_per_chunk > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    fn read_body_cr(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(BodyLf)),
            _ => invalid("invalid chunk body CR"),
        }
    }

    fn read_body_lf(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(Size)),
            _ => invalid("invalid chunk body LF"),
        }
    }

    fn read_trailer(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(TrailerLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn read_trailer_lf(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(EndCr)),
            _ => invalid("invalid trailer end LF"),
        }
    }

    /// A CR ends the message, anything else starts a trailer field.
    fn read_end_cr(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(EndLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn read_end_lf(src: &mut &[u8]) -> Poll<Result<ChunkedState, io::Error>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(End)),
            _ => invalid("invalid chunk end LF"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_basic() {
        let mut buffer: &[u8] = b"10\r\n1234567890abcdef\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_chunk());
        assert_eq!(item.as_bytes().unwrap(), "1234567890abcdef");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(decoder.is_finish());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_chunks() {
        let mut buffer: &[u8] = b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "hello");

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), ", world");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_chunks_with_extensions() {
        let mut buffer: &[u8] = b"5;chunk-ext=value\r\nhello\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "hello");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_chunks_with_trailers() {
        let mut buffer: &[u8] = b"5\r\nhello\r\n0\r\nTrailer: value\r\n\r\nNEXT";
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "hello");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(buffer, b"NEXT");
    }

    #[test]
    fn test_incomplete_chunk() {
        let mut decoder = ChunkedDecoder::new();

        let mut buffer: &[u8] = b"5\r\nhel";
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "hel");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        let mut buffer: &[u8] = b"lo\r\n0\r\n\r\n";
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "lo");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_framing_split_byte_by_byte() {
        let input = b"3\r\nabc\r\n2;x=y\r\nde\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();

        for byte in input.chunks(1) {
            let mut src = byte;
            while let Some(item) = decoder.decode(&mut src).unwrap() {
                match item {
                    PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                    _ => break,
                }
            }
        }

        assert_eq!(body, b"abcde");
        assert!(decoder.is_finish());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut buffer: &[u8] = b"xyz\r\n";
        let mut decoder = ChunkedDecoder::new();
        assert!(matches!(decoder.decode(&mut buffer), Err(ParseError::InvalidBody { .. })));
    }

    #[test]
    fn test_size_overflow() {
        let mut buffer: &[u8] = b"fffffffffffffffff\r\n";
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn test_missing_crlf() {
        let mut buffer: &[u8] = b"5\r\nhelloBad";
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), "hello");
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn test_large_chunk() {
        let size = 1024 * 1024;
        let mut data = Vec::with_capacity(size + 16);
        data.extend(format!("{size:x}\r\n").into_bytes());
        data.extend(vec![b'A'; size]);
        data.extend(b"\r\n0\r\n\r\n");

        let mut buffer = &data[..];
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().len(), size);
        assert!(chunk.as_bytes().unwrap().iter().all(|&b| b == b'A'));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_zero_size_chunk() {
        let mut buffer: &[u8] = b"0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn chunked_token_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(&headers));
        assert!(ChunkedDecoder::from_headers(&headers).is_err());

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, Chunked"));
        assert!(is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static(" chunked , gzip"));
        assert!(is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("identity"));
        assert!(!is_chunked(&headers));
        assert!(matches!(ChunkedDecoder::from_headers(&headers), Err(ParseError::InvalidTransferEncoding { .. })));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunkedx"));
        assert!(!is_chunked(&headers));
    }
}
