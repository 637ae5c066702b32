//! Response head encoding.
//!
//! Writes the status line and header block, and makes the framing headers
//! agree with the [`PayloadSize`] the body will be sent with.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadSize, SendError};

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encodes `(status, headers, payload_size)` as an HTTP/1.1 response head.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<(StatusCode, HeaderMap, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (StatusCode, HeaderMap, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (status, mut headers, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(TRANSFER_ENCODING);
                headers.insert(CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(CONTENT_LENGTH);
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                headers.remove(TRANSFER_ENCODING);
                headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        for (header_name, header_value) in &headers {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// `io::Write` over a `BytesMut` that already has room reserved.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(status: StatusCode, headers: HeaderMap, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((status, headers, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn status_line_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let head = encode(StatusCode::OK, headers, PayloadSize::Length(12));
        assert_eq!(head, "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 12\r\n\r\n");
    }

    #[test]
    fn framing_headers_follow_payload() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("99"));
        let head = encode(StatusCode::OK, headers, PayloadSize::Chunked);
        assert_eq!(head, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");

        let head = encode(StatusCode::NO_CONTENT, HeaderMap::new(), PayloadSize::Empty);
        assert_eq!(head, "HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let head = encode(StatusCode::from_u16(599).unwrap(), HeaderMap::new(), PayloadSize::Empty);
        assert!(head.starts_with("HTTP/1.1 599 \r\n"));
    }
}
