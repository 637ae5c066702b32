//! Multipart body writer.

use std::fmt::Write as _;

use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use micro_bufio::BufWriter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::trace;

use crate::MultipartError;

const MAX_BOUNDARY_LEN: usize = 70;
const COPY_CHUNK_SIZE: usize = 4096;

/// Generates a boundary of 26 dashes followed by 24 random hex digits.
pub fn random_boundary() -> String {
    let mut boundary = "-".repeat(26);
    for _ in 0..24 {
        let digit = fastrand::u32(..16);
        let _ = write!(boundary, "{digit:x}");
    }
    boundary
}

/// Checks a boundary the way RFC 2046 restricts it: 1 to 70 characters out
/// of a small set, spaces allowed except at the end.
pub fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::invalid_boundary("boundary must be 1 to 70 characters long"));
    }

    let last = boundary.len() - 1;
    for (i, b) in boundary.bytes().enumerate() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => {}
            b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' => {}
            b' ' if i != last => {}
            _ => return Err(MultipartError::invalid_boundary("boundary contains an invalid character")),
        }
    }

    Ok(())
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Writes parts separated by a boundary into `W`.
///
/// Each part's delimiter line and headers are held back until the part's
/// first write, or until the part is closed by the next
/// [`create_part`](Self::create_part) or by [`close`](Self::close).
#[derive(Debug)]
pub struct MultipartWriter<W> {
    writer: BufWriter<W>,
    boundary: String,
    pending_preamble: Option<Vec<u8>>,
    parts: usize,
    closed: bool,
}

impl<W> MultipartWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            boundary: random_boundary(),
            pending_preamble: None,
            parts: 0,
            closed: false,
        }
    }

    pub fn with_boundary(writer: W, boundary: &str) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;
        let mut this = Self::new(writer);
        this.boundary = boundary.to_string();
        Ok(this)
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `multipart/form-data; boundary=...`, quoting the boundary when needed.
    pub fn form_data_content_type(&self) -> String {
        let needs_quotes = self.boundary.contains(|c| "()<>@,;:\\\"/[]?= ".contains(c));
        if needs_quotes {
            format!("multipart/form-data; boundary=\"{}\"", self.boundary)
        } else {
            format!("multipart/form-data; boundary={}", self.boundary)
        }
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: AsyncWrite + Unpin> MultipartWriter<W> {
    async fn write_pending_preamble(&mut self) -> Result<(), MultipartError> {
        if let Some(preamble) = self.pending_preamble.take() {
            self.writer.write(&preamble).await?;
        }
        Ok(())
    }

    /// Starts a part with `headers`, closing the current one.
    pub async fn create_part(&mut self, headers: &HeaderMap) -> Result<PartWriter<'_, W>, MultipartError> {
        if self.closed {
            return Err(MultipartError::WriterClosed);
        }
        self.write_pending_preamble().await?;

        let mut preamble = Vec::new();
        if self.parts > 0 {
            preamble.extend_from_slice(b"\r\n");
        }
        preamble.extend_from_slice(b"--");
        preamble.extend_from_slice(self.boundary.as_bytes());
        preamble.extend_from_slice(b"\r\n");
        for (name, value) in headers {
            preamble.extend_from_slice(name.as_str().as_bytes());
            preamble.extend_from_slice(b": ");
            preamble.extend_from_slice(value.as_bytes());
            preamble.extend_from_slice(b"\r\n");
        }
        preamble.extend_from_slice(b"\r\n");

        self.pending_preamble = Some(preamble);
        self.parts += 1;
        Ok(PartWriter { writer: self })
    }

    /// Starts a plain form field.
    pub async fn create_form_field(&mut self, field: &str) -> Result<PartWriter<'_, W>, MultipartError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, disposition(&format!("form-data; name=\"{}\"", escape_quotes(field)))?);
        self.create_part(&headers).await
    }

    /// Starts a file field with `application/octet-stream` content.
    pub async fn create_form_file(&mut self, field: &str, file_name: &str) -> Result<PartWriter<'_, W>, MultipartError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            disposition(&format!("form-data; name=\"{}\"; filename=\"{}\"", escape_quotes(field), escape_quotes(file_name)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        self.create_part(&headers).await
    }

    pub async fn write_field(&mut self, field: &str, value: &str) -> Result<(), MultipartError> {
        let mut part = self.create_form_field(field).await?;
        part.write(value.as_bytes()).await?;
        Ok(())
    }

    /// Writes a file field whose content is read from `reader` until eof.
    pub async fn write_file<R>(&mut self, field: &str, file_name: &str, reader: &mut R) -> Result<u64, MultipartError>
    where
        R: AsyncRead + Unpin,
    {
        let mut part = self.create_form_file(field, file_name).await?;
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            part.write(&chunk[..n]).await?;
            copied += n as u64;
        }
        // an empty file still gets its delimiter and headers
        part.write(&[]).await?;
        Ok(copied)
    }

    /// Writes the final delimiter and flushes. Fails if already closed.
    pub async fn close(&mut self) -> Result<(), MultipartError> {
        if self.closed {
            return Err(MultipartError::WriterClosed);
        }
        self.write_pending_preamble().await?;
        self.closed = true;

        let tail = format!("\r\n--{}--\r\n", self.boundary);
        self.writer.write(tail.as_bytes()).await?;
        self.writer.flush().await?;
        trace!(parts = self.parts, "closed multipart writer");
        Ok(())
    }
}

fn disposition(value: &str) -> Result<HeaderValue, MultipartError> {
    HeaderValue::from_str(value).map_err(|e| MultipartError::invalid_header(format!("{e}: {value}")))
}

/// Body writer for the most recently created part.
#[derive(Debug)]
pub struct PartWriter<'a, W> {
    writer: &'a mut MultipartWriter<W>,
}

impl<W: AsyncWrite + Unpin> PartWriter<'_, W> {
    /// Writes body bytes, emitting the part's delimiter and headers first.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, MultipartError> {
        if self.writer.closed {
            return Err(MultipartError::WriterClosed);
        }
        self.writer.write_pending_preamble().await?;
        Ok(self.writer.writer.write(data).await?)
    }
}
