//! Streaming multipart reader.
//!
//! [`MultipartReader::next_part`] walks the delimiter lines of a multipart
//! body and returns one [`Part`] at a time. A part borrows the reader, so only
//! one part can be live; asking for the next part first drains whatever the
//! caller left unread of the previous one.
//!
//! Part bodies are read through a peek-then-consume loop: the lookahead is
//! grown until [`scan_until_boundary`] can tell how many bytes are body, and
//! only those are consumed. Delimiter bytes are never copied into the caller's
//! buffer.

use std::cmp;
use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use micro_bufio::{BufError, BufReader, DEFAULT_BUF_SIZE, textproto};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::MultipartError;
use crate::scan::{BoundaryPatterns, Scan, scan_until_boundary};

const DRAIN_CHUNK_SIZE: usize = 4096;

/// Read position inside the live part.
#[derive(Debug, Default)]
struct PartState {
    /// Body bytes returned so far.
    total: u64,
    /// Bytes known to be body but not yet consumed.
    pending: usize,
    /// The closing delimiter was reached.
    done: bool,
}

#[derive(Debug)]
pub struct MultipartReader<R> {
    reader: BufReader<R>,
    boundary: String,
    patterns: BoundaryPatterns,
    /// Set when the first delimiter line ends in a bare LF.
    lf_only: bool,
    parts_read: usize,
    current: Option<PartState>,
    finished: bool,
}

impl<R> MultipartReader<R> {
    /// Reads a multipart body from `reader` using `boundary` (without the leading dashes).
    pub fn new(reader: R, boundary: &str) -> Result<Self, MultipartError> {
        Self::with_capacity(DEFAULT_BUF_SIZE, reader, boundary)
    }

    /// Buffers `capacity` bytes, raised to what a delimiter line of
    /// `boundary` needs.
    pub fn with_capacity(capacity: usize, reader: R, boundary: &str) -> Result<Self, MultipartError> {
        let capacity = cmp::max(capacity, min_capacity(boundary));
        Self::from_buf_reader(BufReader::with_capacity(capacity, reader), boundary)
    }

    /// Reads from an already buffered source, keeping anything it buffered.
    ///
    /// Fails when the buffer is too small to hold a delimiter line.
    pub fn from_buf_reader(reader: BufReader<R>, boundary: &str) -> Result<Self, MultipartError> {
        if reader.size() < min_capacity(boundary) {
            return Err(MultipartError::invalid_boundary("boundary does not fit the read buffer"));
        }
        Ok(Self {
            reader,
            boundary: boundary.to_string(),
            patterns: BoundaryPatterns::new(boundary)?,
            lf_only: false,
            parts_read: 0,
            current: None,
            finished: false,
        })
    }

    /// Reads a body whose `Content-Type` header value is `content_type`.
    ///
    /// The media type must be `multipart/*` with a `boundary` parameter.
    pub fn from_content_type(reader: R, content_type: &str) -> Result<Self, MultipartError> {
        let mime = content_type.parse::<mime::Mime>().map_err(MultipartError::invalid_content_type)?;
        if mime.type_() != mime::MULTIPART {
            return Err(MultipartError::invalid_content_type(format!("{mime} is not multipart")));
        }

        let Some(boundary) = mime.get_param(mime::BOUNDARY) else {
            return Err(MultipartError::invalid_content_type("missing boundary parameter"));
        };
        Self::new(reader, boundary.as_str())
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn into_inner(self) -> BufReader<R> {
        self.reader
    }

    fn is_boundary_delimiter_line(&mut self, line: &[u8]) -> bool {
        let Some(rest) = line.strip_prefix(self.patterns.dash_boundary()) else {
            return false;
        };
        let rest = skip_lwsp(rest);

        if self.parts_read == 0 && rest == b"\n" {
            trace!("multipart body uses bare LF line endings");
            self.lf_only = true;
        }
        rest == self.patterns.new_line(self.lf_only)
    }

    fn is_final_boundary(&self, line: &[u8]) -> bool {
        let Some(rest) = line.strip_prefix(self.patterns.dash_boundary_dash()) else {
            return false;
        };
        let rest = skip_lwsp(rest);
        rest.is_empty() || rest == self.patterns.new_line(self.lf_only)
    }
}

/// A delimiter line plus some linear whitespace, and the lookahead a part
/// body needs to confirm `\r\n--boundary`.
fn min_capacity(boundary: &str) -> usize {
    boundary.len() + 8
}

fn skip_lwsp(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| *b != b' ' && *b != b'\t').unwrap_or(line.len());
    &line[start..]
}

impl<R: AsyncRead + Unpin> MultipartReader<R> {
    /// Returns the next part, or `Ok(None)` after the final delimiter.
    pub async fn next_part(&mut self) -> Result<Option<Part<'_, R>>, MultipartError> {
        if self.finished {
            return Ok(None);
        }
        if self.current.is_some() {
            self.drain_part().await?;
            self.current = None;
        }

        let mut expect_new_part = false;
        let mut mid_line = false;
        loop {
            let (line, complete) = match self.reader.read_until(b'\n').await {
                Ok(Some(line)) => (Bytes::copy_from_slice(line), true),
                Ok(None) => return Err(MultipartError::UnexpectedEof),
                Err(BufError::BufferFull { partial }) => (partial, false),
                Err(e) => return Err(e.into()),
            };

            // no fragment of an overlong line is a delimiter line, the tail included
            let candidate = complete && !mid_line;
            mid_line = !complete;

            if candidate && self.is_boundary_delimiter_line(&line) {
                self.parts_read += 1;
                let headers = textproto::read_mime_header(&mut self.reader).await?.ok_or(MultipartError::UnexpectedEof)?;
                self.current = Some(PartState::default());
                return Ok(Some(Part::new(self, headers)));
            }

            if candidate && self.is_final_boundary(&line) {
                debug!(parts = self.parts_read, "reached final multipart boundary");
                self.finished = true;
                return Ok(None);
            }

            if expect_new_part {
                return Err(MultipartError::malformed(format!(
                    "expecting a new part, got line {:?}",
                    String::from_utf8_lossy(&line)
                )));
            }

            if self.parts_read == 0 {
                // preamble
                continue;
            }

            if candidate && line == self.patterns.new_line(self.lf_only) {
                expect_new_part = true;
                continue;
            }

            return Err(MultipartError::malformed(format!("unexpected line {:?}", String::from_utf8_lossy(&line))));
        }
    }

    async fn drain_part(&mut self) -> Result<(), MultipartError> {
        let mut scratch = vec![0u8; DRAIN_CHUNK_SIZE];
        let mut drained = 0usize;
        while let Some(n) = self.read_part(&mut scratch).await? {
            drained += n;
        }
        if drained > 0 {
            trace!(drained, "discarded unread part body");
        }
        Ok(())
    }

    async fn read_part(&mut self, dst: &mut [u8]) -> Result<Option<usize>, MultipartError> {
        let Self { reader, patterns, lf_only, current, .. } = self;
        let Some(state) = current.as_mut() else {
            return Ok(None);
        };
        if dst.is_empty() {
            return Ok(Some(0));
        }

        if state.pending == 0 {
            if state.done {
                return Ok(None);
            }

            let mut peek_len = 1;
            loop {
                peek_len = cmp::max(peek_len, reader.buffered());
                reader.peek(peek_len).await?;

                let window = reader.buffer();
                let buf = &window[..cmp::min(peek_len, window.len())];
                let eof = reader.is_eof() && buf.len() == window.len();

                match scan_until_boundary(buf, patterns, *lf_only, state.total, eof) {
                    Scan::Body(n) => {
                        state.pending = n;
                        break;
                    }
                    Scan::Boundary => {
                        state.done = true;
                        return Ok(None);
                    }
                    Scan::NeedMore if eof => return Err(MultipartError::UnexpectedEof),
                    Scan::NeedMore => peek_len = buf.len() + 1,
                }
            }
        }

        let len = cmp::min(dst.len(), state.pending);
        let Some(n) = reader.read_full(&mut dst[..len]).await? else {
            return Err(MultipartError::UnexpectedEof);
        };
        state.pending -= n;
        state.total += n as u64;
        Ok(Some(n))
    }
}

/// One part of a multipart body.
#[derive(Debug)]
pub struct Part<'a, R> {
    reader: &'a mut MultipartReader<R>,
    headers: HeaderMap,
    disposition: Option<String>,
    params: HashMap<String, String>,
}

impl<'a, R> Part<'a, R> {
    fn new(reader: &'a mut MultipartReader<R>, headers: HeaderMap) -> Self {
        let (disposition, params) = match headers.get(CONTENT_DISPOSITION).map(|v| String::from_utf8_lossy(v.as_bytes())) {
            Some(value) => parse_content_disposition(&value),
            None => (None, HashMap::new()),
        };
        Self { reader, headers, disposition, params }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The Content-Disposition type in lower case, e.g. `form-data`.
    pub fn disposition(&self) -> Option<&str> {
        self.disposition.as_deref()
    }

    /// A Content-Disposition parameter; names are matched in lower case.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The `name` Content-Disposition parameter.
    pub fn form_name(&self) -> Option<&str> {
        self.param("name")
    }

    /// The `filename` Content-Disposition parameter.
    pub fn file_name(&self) -> Option<&str> {
        self.param("filename")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

impl<R: AsyncRead + Unpin> Part<'_, R> {
    /// Reads body bytes into `dst`, `Ok(None)` at the end of the part.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<Option<usize>, MultipartError> {
        self.reader.read_part(dst).await
    }

    /// Reads the rest of the body into memory.
    pub async fn bytes(&mut self) -> Result<Bytes, MultipartError> {
        let mut out = BytesMut::new();
        self.read_limited(&mut out, u64::MAX).await?;
        Ok(out.freeze())
    }

    /// Appends body bytes to `out` until the part ends or `limit` bytes were read.
    pub async fn read_limited(&mut self, out: &mut BytesMut, limit: u64) -> Result<u64, MultipartError> {
        let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE];
        let mut read = 0u64;

        while read < limit {
            let want = usize::try_from(limit - read).map_or(chunk.len(), |left| cmp::min(left, chunk.len()));
            let Some(n) = self.read(&mut chunk[..want]).await? else {
                break;
            };
            out.extend_from_slice(&chunk[..n]);
            read += n as u64;
        }

        Ok(read)
    }

    /// Copies the rest of the body into `writer`, returning the byte count.
    ///
    /// `writer` is not flushed.
    pub async fn copy_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<u64, MultipartError> {
        let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE];
        let mut copied = 0u64;

        while let Some(n) = self.read(&mut chunk).await? {
            writer.write_all(&chunk[..n]).await?;
            copied += n as u64;
        }

        Ok(copied)
    }
}

/// Splits `form-data; name="field"; filename="a.txt"` into the lower cased
/// type and its parameters. One layer of matching quotes is stripped.
fn parse_content_disposition(value: &str) -> (Option<String>, HashMap<String, String>) {
    let mut comps = value.split(';');
    let disposition = comps.next().map(|d| d.trim().to_ascii_lowercase()).filter(|d| !d.is_empty());

    let params = comps
        .filter_map(|comp| comp.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), unquote(value.trim()).to_string()))
        .collect();

    (disposition, params)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
