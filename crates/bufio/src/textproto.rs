//! MIME style header blocks: `Key: value` lines ended by an empty line.
//!
//! Lines starting with a space or tab continue the previous header; they are
//! joined with a single space after trimming.

use std::io;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::{BufError, BufReader, Line};

/// Reads a header block, consuming the blank line that ends it.
///
/// Returns `Ok(None)` when the source is exhausted before the first byte and
/// [`BufError::UnexpectedEof`] when it ends inside the block. Malformed lines
/// fail with an [`io::ErrorKind::InvalidData`] error. Headers whose name or
/// value is not valid for [`HeaderMap`] are skipped.
pub async fn read_mime_header<R>(reader: &mut BufReader<R>) -> Result<Option<HeaderMap>, BufError>
where
    R: AsyncRead + Unpin,
{
    match peek_byte(reader).await? {
        None => return Ok(None),
        Some(b' ' | b'\t') => {
            let line = read_full_line(reader).await?.unwrap_or_default();
            return Err(invalid_data(format!("malformed mime header initial line: {}", String::from_utf8_lossy(&line))));
        }
        Some(_) => {}
    }

    let mut headers = HeaderMap::new();
    loop {
        let Some(kv) = read_continued_line(reader).await? else {
            return Err(BufError::unexpected_eof(Bytes::new()));
        };
        if kv.is_empty() {
            return Ok(Some(headers));
        }

        let Some(colon) = kv.iter().position(|b| *b == b':') else {
            return Err(invalid_data(format!("malformed mime header line: {}", String::from_utf8_lossy(&kv))));
        };

        let key = &kv[..colon];
        if key.is_empty() {
            continue;
        }
        let value = kv[colon + 1..].trim_ascii_start();

        match (HeaderName::from_bytes(key), HeaderValue::from_bytes(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(line = %String::from_utf8_lossy(&kv), "skip invalid mime header"),
        }
    }
}

async fn peek_byte<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<u8>, BufError> {
    Ok(reader.peek(1).await?.and_then(|b| b.first().copied()))
}

/// Reads one line, joining the fragments of lines longer than the buffer.
async fn read_full_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<Vec<u8>>, BufError> {
    let mut line = Vec::new();
    let mut seen = false;

    while let Some(Line { line: fragment, more }) = reader.read_line().await? {
        seen = true;
        line.extend_from_slice(&fragment);
        if !more {
            return Ok(Some(line));
        }
    }

    Ok(seen.then_some(line))
}

async fn read_continued_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<Vec<u8>>, BufError> {
    let Some(line) = read_full_line(reader).await? else {
        return Ok(None);
    };
    if line.is_empty() {
        return Ok(Some(line));
    }

    let mut line = line.trim_ascii_end().to_vec();
    while let Some(b' ' | b'\t') = peek_byte(reader).await? {
        let Some(next) = read_full_line(reader).await? else {
            break;
        };
        line.push(b' ');
        line.extend_from_slice(next.trim_ascii());
    }

    Ok(Some(line))
}

fn invalid_data(msg: String) -> BufError {
    BufError::io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn crlf(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    #[tokio::test]
    async fn reads_block_and_stops_at_blank_line() {
        let data = crlf(indoc! {r#"
            Content-Disposition: form-data; name="field"
            Content-Type: text/plain
            X-Folded: first
              second
            	third

            body"#});
        let mut reader = BufReader::new(&data[..]);

        let headers = read_mime_header(&mut reader).await.unwrap().unwrap();
        assert_eq!(headers.get(http::header::CONTENT_DISPOSITION).unwrap(), r#"form-data; name="field""#);
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(headers.get("x-folded").unwrap(), "first second third");

        assert_eq!(reader.buffer(), b"body");
    }

    #[tokio::test]
    async fn repeated_keys_accumulate() {
        let mut reader = BufReader::new(&b"A: 1\r\nA: 2\r\n: ignored\r\n\r\n"[..]);
        let headers = read_mime_header(&mut reader).await.unwrap().unwrap();
        let values: Vec<_> = headers.get_all("a").iter().collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(headers.len(), 2);
    }

    #[tokio::test]
    async fn leading_whitespace_is_malformed() {
        let mut reader = BufReader::new(&b" Key: value\r\n\r\n"[..]);
        let err = read_mime_header(&mut reader).await.unwrap_err();
        let err: io::Error = err.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn line_without_colon_is_malformed() {
        let mut reader = BufReader::new(&b"Key value\r\n\r\n"[..]);
        let err: io::Error = read_mime_header(&mut reader).await.unwrap_err().into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn eof_inside_block() {
        let mut reader = BufReader::new(&b"Key: value\r\n"[..]);
        assert!(read_mime_header(&mut reader).await.unwrap_err().is_unexpected_eof());

        let mut reader = BufReader::new(&b""[..]);
        assert!(read_mime_header(&mut reader).await.unwrap().is_none());
    }
}
