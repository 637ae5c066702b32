//! Request head decoding.
//!
//! [`HeaderDecoder`] runs `httparse` over whatever part of the head is
//! currently buffered. An incomplete head is not an error: the caller grows
//! the window and tries again, until the configured limits are exceeded.
//!
//! Header names and values are not copied one by one. The decoder records
//! their byte ranges, copies the head once into a shared `Bytes` and slices
//! the values out of it.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Method, Request};
use httparse::{Error, Status};
use tracing::trace;

use crate::codec::body::is_chunked;
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// A complete head: the request, its body framing and the head's length.
pub type DecodedHead = (RequestHeader, PayloadSize, usize);

/// Parses request heads within a header count and a byte limit.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_headers: usize,
    max_header_bytes: usize,
}

impl HeaderDecoder {
    pub fn new(max_headers: usize, max_header_bytes: usize) -> Self {
        Self { max_headers, max_header_bytes }
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// Tries to decode one request head from the start of `src`.
    ///
    /// - `Ok(Some((header, payload_size, consumed)))` once the head is complete,
    ///   `consumed` being its length including the blank line
    /// - `Ok(None)` if more bytes are needed
    /// - `Err(ParseError)` if the head is malformed or over the limits
    pub fn decode(&self, src: &[u8]) -> Result<Option<DecodedHead>, ParseError> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            e => ParseError::invalid_header(e.to_string()),
        });

        let body_offset = match parsed_result? {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            // HTTP/2 and HTTP/3 are not spoken here
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let header_count = req.headers.len();
        let mut header_index = vec![HeaderIndex::EMPTY; header_count];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let method = Method::from_bytes(req.method.ok_or(ParseError::InvalidMethod)?.as_bytes()).map_err(|_e| ParseError::InvalidMethod)?;
        let uri = req.path.ok_or(ParseError::InvalidUri)?.parse::<http::Uri>().map_err(|_e| ParseError::InvalidUri)?;

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;

        let headers = request.headers_mut();
        headers.reserve(header_count);

        let head = Bytes::copy_from_slice(&src[..body_offset]);
        for index in &header_index {
            let name = HeaderName::from_bytes(&head[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
            headers.append(name, value);
        }

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size, body_offset)))
    }
}

/// Byte ranges of a header's name and value within the parsed buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    /// Records where each parsed header name and value sits in `bytes`.
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}

/// Resolves the body framing of a request, refer
/// <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>.
///
/// - Transfer-Encoding listing `chunked` means a chunked body
/// - Transfer-Encoding without `chunked` means no body
/// - Content-Length means a body of that length; repeated values must agree
/// - neither means no body
///
/// Transfer-Encoding together with Content-Length is rejected, as is a HEAD
/// request announcing a body.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let has_te = header.headers().contains_key(TRANSFER_ENCODING);
    let content_length = parse_content_length(header)?;

    match (has_te, content_length) {
        (true, Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
        (true, None) if is_chunked(header.headers()) => Ok(PayloadSize::new_chunked()),
        (true, None) | (false, None) => Ok(PayloadSize::new_empty()),
        (false, Some(length)) => {
            ensure!(
                length == 0 || *header.method() != Method::HEAD,
                ParseError::invalid_content_length(format!("HEAD request with content-length {length}"))
            );
            Ok(PayloadSize::new_length(length))
        }
    }
}

fn parse_content_length(header: &RequestHeader) -> Result<Option<u64>, ParseError> {
    let mut length = None;
    for value in header.headers().get_all(CONTENT_LENGTH) {
        let cl_str = value.to_str().map_err(|_e| ParseError::invalid_content_length("value can't to_str"))?;
        for item in cl_str.split(',') {
            let item = item.trim();
            // a leading sign is not a valid length
            ensure!(item.bytes().all(|b| b.is_ascii_digit()), ParseError::invalid_content_length(format!("value {cl_str} is not u64")));
            let parsed = item.parse::<u64>().map_err(|_e| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(ParseError::invalid_content_length(format!("conflicting values {previous} and {parsed}")));
                }
                _ => length = Some(parsed),
            }
        }
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Version;
    use indoc::indoc;

    fn decoder() -> HeaderDecoder {
        HeaderDecoder::new(64, 8 * 1024)
    }

    fn decode(input: &str) -> Result<Option<DecodedHead>, ParseError> {
        decoder().decode(input.as_bytes())
    }

    #[test]
    fn consumed_stops_at_body() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let (_, _, consumed) = decode(str).unwrap().unwrap();
        assert_eq!(&str.as_bytes()[consumed..], b"123");
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let (header, payload_size, consumed) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(consumed, str.len());

        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().host(), None);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.uri().query(), None);

        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert_eq!(header.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
        assert_eq!(header.headers().get(http::header::USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
    }

    #[test]
    fn from_edge() {
        let str = indoc! {r##"
        GET /index/?a=1&b=2&a=3 HTTP/1.1
        Host: 127.0.0.1:8080
        Connection: keep-alive
        Cache-Control: max-age=0
        sec-ch-ua: "#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109"
        sec-ch-ua-mobile: ?0
        sec-ch-ua-platform: "macOS"
        Upgrade-Insecure-Requests: 1
        User-Agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36 Edg/109.0.1518.52
        Accept: text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9
        Sec-Fetch-Site: none
        Sec-Fetch-Mode: navigate
        Sec-Fetch-User: ?1
        Sec-Fetch-Dest: document
        Accept-Encoding: gzip, deflate, br
        Accept-Language: zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7

        "##};

        let (header, payload_size, _) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.uri().path(), "/index/");
        assert_eq!(header.uri().query(), Some("a=1&b=2&a=3"));
        assert_eq!(header.headers().len(), 15);
        assert_eq!(
            header.headers().get("sec-ch-ua"),
            Some(&HeaderValue::from_static(r##""#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109""##))
        );
        assert_eq!(header.headers().get("Sec-Fetch-Dest"), Some(&HeaderValue::from_static("document")));
        assert!(header.is_keep_alive());
    }

    #[test]
    fn partial_head_needs_more() {
        assert!(decode("GET / HTTP/1.1\r\nHost: a\r\n").unwrap().is_none());
        assert!(decode("GE").unwrap().is_none());
    }

    #[test]
    fn head_over_limit() {
        let decoder = HeaderDecoder::new(64, 32);
        let partial = format!("GET / HTTP/1.1\r\nX-Long: {}", "a".repeat(40));
        assert!(matches!(decoder.decode(partial.as_bytes()), Err(ParseError::TooLargeHeader { .. })));

        let complete = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n", "a".repeat(40));
        assert!(matches!(decoder.decode(complete.as_bytes()), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn too_many_headers() {
        let decoder = HeaderDecoder::new(2, 1024);
        let result = decoder.decode(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
        assert!(matches!(result, Err(ParseError::TooManyHeaders { max_num: 2 })));
    }

    #[test]
    fn malformed_request_line() {
        assert!(matches!(decode("GET / HTTP/1.1 junk\r\n\r\n"), Err(ParseError::InvalidHeader { .. })));
        assert!(decode("NOT A REQUEST\r\n\r\n").is_err());
    }

    #[test]
    fn body_framing() {
        let (_, size, _) = decode("POST / HTTP/1.1\r\nContent-Length: 12\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Length(12));

        let (_, size, _) = decode("POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Empty);

        let (_, size, _) = decode("POST / HTTP/1.1\r\nTransfer-Encoding: gzip, Chunked\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Chunked);

        let (_, size, _) = decode("POST / HTTP/1.1\r\nTransfer-Encoding: identity\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Empty);

        let (_, size, _) = decode("GET / HTTP/1.1\r\nContent-Length: 3\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Length(3));
    }

    #[test]
    fn content_length_validation() {
        let (_, size, _) = decode("POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n").unwrap().unwrap();
        assert_eq!(size, PayloadSize::Length(5));

        let conflicting = decode("POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(matches!(conflicting, Err(ParseError::InvalidContentLength { .. })));

        let signed = decode("POST / HTTP/1.1\r\nContent-Length: +5\r\n\r\n");
        assert!(matches!(signed, Err(ParseError::InvalidContentLength { .. })));

        let both = decode("POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(matches!(both, Err(ParseError::InvalidContentLength { .. })));

        let head = decode("HEAD / HTTP/1.1\r\nContent-Length: 5\r\n\r\n");
        assert!(matches!(head, Err(ParseError::InvalidContentLength { .. })));

        let (_, size, _) = decode("HEAD / HTTP/1.1\r\nContent-Length: 0\r\n\r\n").unwrap().unwrap();
        assert!(size.is_empty());
    }

    #[test]
    fn http_10_request() {
        let (header, _, _) = decode("GET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(header.version(), Version::HTTP_10);
        assert!(!header.is_keep_alive());
    }
}
