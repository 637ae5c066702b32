//! Buffered reader over an async byte source.
//!
//! [`BufReader`] keeps a fixed capacity window `buf[r..w]` of bytes that have
//! been read from the source but not yet consumed. Unlike tokio's reader of
//! the same name it exposes the scanning operations protocol parsers need:
//! delimiter scans that never rescan bytes, line reads that survive lines
//! longer than the buffer, and peeks that keep the read cursor in place.

use std::cmp;
use std::future::poll_fn;
use std::io;
use std::mem;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};
use tracing::trace;

use crate::BufError;

/// Capacity used by [`BufReader::new`].
pub const DEFAULT_BUF_SIZE: usize = 4096;

/// Smallest capacity a reader will be created with.
pub const MIN_BUF_SIZE: usize = 16;

/// Number of interrupted reads tolerated in a row before a fill gives up.
pub const MAX_CONSECUTIVE_EMPTY_READS: usize = 100;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// One line returned by [`BufReader::read_line`].
///
/// `more` is set when the line did not fit in the buffer: `line` holds a
/// fragment and the rest follows on the next calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub line: Bytes,
    pub more: bool,
}

/// A buffered reader with a fixed size window over `R`.
#[derive(Debug)]
pub struct BufReader<R> {
    inner: R,
    buf: Box<[u8]>,
    r: usize,
    w: usize,
    eof: bool,
}

impl<R> BufReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    /// Creates a reader with at least `capacity` bytes of buffer.
    ///
    /// Capacities below [`MIN_BUF_SIZE`] are raised to it.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        let capacity = cmp::max(capacity, MIN_BUF_SIZE);
        Self { inner, buf: vec![0; capacity].into_boxed_slice(), r: 0, w: 0, eof: false }
    }

    /// Returns the capacity of the underlying buffer.
    #[inline]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Returns the number of bytes that can be read without touching the source.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.w - self.r
    }

    /// Returns the buffered, unconsumed bytes.
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buf[self.r..self.w]
    }

    /// Marks `amt` buffered bytes as consumed.
    #[inline]
    pub fn consume(&mut self, amt: usize) {
        self.r = cmp::min(self.r + amt, self.w);
    }

    /// Whether the source has reported end of stream.
    ///
    /// Buffered bytes may still be pending when this is true.
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Discards all buffered data and starts reading from `inner`.
    pub fn reset(&mut self, inner: R) {
        self.inner = inner;
        self.r = 0;
        self.w = 0;
        self.eof = false;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn compact(&mut self) {
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.w -= self.r;
            self.r = 0;
        }
    }

    /// Hands the whole buffered window out and continues on a fresh array.
    fn rotate(&mut self) -> Bytes {
        let fresh = vec![0; self.buf.len()].into_boxed_slice();
        let old = mem::replace(&mut self.buf, fresh);
        let window = self.r..self.w;
        self.r = 0;
        self.w = 0;
        Bytes::from(old).slice(window)
    }
}

impl<R: AsyncRead + Unpin> BufReader<R> {
    /// Compacts the buffer and issues one read into the free space.
    ///
    /// A zero byte read sets the end of stream flag. Interrupted reads are
    /// retried up to [`MAX_CONSECUTIVE_EMPTY_READS`] times.
    pub fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BufError>> {
        self.compact();

        if self.w >= self.buf.len() {
            return Poll::Ready(Err(BufError::buffer_full(Bytes::copy_from_slice(self.buffer()))));
        }

        for _ in 0..MAX_CONSECUTIVE_EMPTY_READS {
            let mut read_buf = ReadBuf::new(&mut self.buf[self.w..]);
            match Pin::new(&mut self.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        trace!("source reached eof");
                        self.eof = true;
                    } else {
                        self.w += n;
                    }
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(BufError::io(e))),
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(Err(BufError::NoProgress(MAX_CONSECUTIVE_EMPTY_READS)))
    }

    async fn fill(&mut self) -> Result<(), BufError> {
        poll_fn(|cx| self.poll_fill(cx)).await
    }

    fn poll_read_slice(&mut self, cx: &mut Context<'_>, dst: &mut [u8]) -> Poll<Result<Option<usize>, BufError>> {
        if dst.is_empty() {
            return Poll::Ready(Ok(Some(0)));
        }

        if self.r == self.w {
            if self.eof {
                return Poll::Ready(Ok(None));
            }

            if dst.len() >= self.buf.len() {
                // large read with nothing buffered, skip the copy
                let mut read_buf = ReadBuf::new(dst);
                ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
                let n = read_buf.filled().len();
                if n == 0 {
                    self.eof = true;
                    return Poll::Ready(Ok(None));
                }
                return Poll::Ready(Ok(Some(n)));
            }

            ready!(self.poll_fill(cx))?;
            if self.r == self.w {
                return Poll::Ready(Ok(None));
            }
        }

        let n = cmp::min(dst.len(), self.buffered());
        dst[..n].copy_from_slice(&self.buf[self.r..self.r + n]);
        self.r += n;
        Poll::Ready(Ok(Some(n)))
    }

    /// Reads up to `dst.len()` bytes.
    ///
    /// Returns `Ok(None)` once the source is exhausted and nothing is buffered.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<Option<usize>, BufError> {
        poll_fn(|cx| self.poll_read_slice(cx, dst)).await
    }

    /// Reads exactly `dst.len()` bytes.
    ///
    /// Returns `Ok(None)` if the stream ended before the first byte, and
    /// [`BufError::UnexpectedEof`] carrying the filled prefix if it ended in
    /// between. Other failures carry the filled prefix as well.
    pub async fn read_full(&mut self, dst: &mut [u8]) -> Result<Option<usize>, BufError> {
        let mut filled = 0;
        while filled < dst.len() {
            match self.read(&mut dst[filled..]).await {
                Ok(Some(n)) => filled += n,
                Ok(None) if filled == 0 => return Ok(None),
                Ok(None) => return Err(BufError::unexpected_eof(Bytes::copy_from_slice(&dst[..filled]))),
                Err(e) => return Err(e.with_partial(Bytes::copy_from_slice(&dst[..filled]))),
            }
        }
        Ok(Some(filled))
    }

    pub async fn read_byte(&mut self) -> Result<Option<u8>, BufError> {
        while self.r == self.w {
            if self.eof {
                return Ok(None);
            }
            self.fill().await?;
        }

        let b = self.buf[self.r];
        self.r += 1;
        Ok(Some(b))
    }

    /// Scans for `delim` and consumes up to and including it.
    ///
    /// Only bytes added by each refill are searched. The returned range
    /// indexes `self.buf` and stays valid until the next mutation.
    async fn scan_until(&mut self, delim: u8) -> Result<Option<Range<usize>>, BufError> {
        let mut searched = 0;
        loop {
            if let Some(i) = self.buf[self.r + searched..self.w].iter().position(|b| *b == delim) {
                let start = self.r;
                self.r += searched + i + 1;
                return Ok(Some(start..self.r));
            }

            if self.eof {
                if self.r == self.w {
                    return Ok(None);
                }
                let start = self.r;
                self.r = self.w;
                return Ok(Some(start..self.w));
            }

            if self.buffered() >= self.buf.len() {
                trace!(size = self.buf.len(), delim, "buffer full before delimiter");
                return Err(BufError::BufferFull { partial: self.rotate() });
            }

            searched = self.buffered();
            self.fill().await?;
        }
    }

    /// Reads until the first occurrence of `delim`, which is included.
    ///
    /// At end of stream the remaining bytes are returned once without a
    /// delimiter, then `Ok(None)`. If the buffer fills up first the call fails
    /// with [`BufError::BufferFull`] carrying the whole buffer, which counts as
    /// consumed; the reader continues on a fresh buffer.
    pub async fn read_until(&mut self, delim: u8) -> Result<Option<&[u8]>, BufError> {
        Ok(self.scan_until(delim).await?.map(|range| &self.buf[range]))
    }

    /// Reads one line, without its `\n` or `\r\n` terminator.
    ///
    /// Lines longer than the buffer are returned in fragments flagged with
    /// `more`. A `\r` ending such a fragment is kept back so that a `\r\n`
    /// split by the buffer boundary is still seen as one terminator.
    pub async fn read_line(&mut self) -> Result<Option<Line>, BufError> {
        let range = match self.scan_until(LF).await {
            Ok(Some(range)) => range,
            Ok(None) => return Ok(None),
            Err(BufError::BufferFull { mut partial }) => {
                if !self.eof && partial.last() == Some(&CR) {
                    partial.truncate(partial.len() - 1);
                    // the buffer was just rotated, give the CR back
                    self.buf[0] = CR;
                    self.r = 0;
                    self.w = 1;
                }
                return Ok(Some(Line { line: partial, more: !self.eof }));
            }
            Err(e) => return Err(e),
        };

        let line = &self.buf[range];
        let mut end = line.len();
        if line.last() == Some(&LF) {
            end -= 1;
            if end > 0 && line[end - 1] == CR {
                end -= 1;
            }
        }
        Ok(Some(Line { line: Bytes::copy_from_slice(&line[..end]), more: false }))
    }

    /// Returns the next `n` bytes without consuming them.
    ///
    /// At end of stream the available remainder is returned even when it is
    /// shorter than `n`, and `Ok(None)` when nothing remains. Asking for more
    /// than the buffer can hold fails with [`BufError::BufferFull`].
    pub async fn peek(&mut self, n: usize) -> Result<Option<&[u8]>, BufError> {
        let mut avail = self.buffered();
        while avail < n && avail < self.buf.len() && !self.eof {
            if let Err(e) = self.fill().await {
                return Err(e.with_partial(Bytes::copy_from_slice(self.buffer())));
            }
            avail = self.buffered();
        }

        if avail == 0 && self.eof {
            return Ok(None);
        }
        if avail < n && !self.eof {
            return Err(BufError::buffer_full(Bytes::copy_from_slice(self.buffer())));
        }

        let len = cmp::min(n, avail);
        Ok(Some(&self.buf[self.r..self.r + len]))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BufReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let dst = buf.initialize_unfilled();
        match ready!(this.poll_read_slice(cx, dst)) {
            Ok(Some(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Ok(None) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncBufRead for BufReader<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if this.r == this.w && !this.eof {
            ready!(this.poll_fill(cx)).map_err(io::Error::from)?;
        }
        Poll::Ready(Ok(&this.buf[this.r..this.w]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        BufReader::consume(self.get_mut(), amt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    /// A source that never produces data nor reaches eof.
    struct Interrupting;

    impl AsyncRead for Interrupting {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::Interrupted.into()))
        }
    }

    #[test]
    fn capacity_has_a_floor() {
        let reader = BufReader::with_capacity(1, &b""[..]);
        assert_eq!(reader.size(), MIN_BUF_SIZE);

        let reader = BufReader::new(&b""[..]);
        assert_eq!(reader.size(), DEFAULT_BUF_SIZE);
    }

    #[tokio::test]
    async fn peek_returns_short_remainder_at_eof() {
        let mut reader = BufReader::new(&b"abc"[..]);

        let peeked = reader.peek(5).await.unwrap().unwrap();
        assert_eq!(peeked, b"abc");

        // nothing was consumed
        assert_eq!(reader.buffered(), 3);
        let mut dst = [0u8; 3];
        assert_eq!(reader.read_full(&mut dst).await.unwrap(), Some(3));
        assert_eq!(&dst, b"abc");

        assert!(reader.peek(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peek_beyond_capacity_is_buffer_full() {
        let data = [b'x'; 64];
        let mut reader = BufReader::with_capacity(16, &data[..]);

        let err = reader.peek(17).await.unwrap_err();
        assert!(err.is_buffer_full());
        assert_eq!(err.partial().len(), 16);

        // still readable afterwards
        assert_eq!(reader.peek(16).await.unwrap().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn peek_grows_across_reads() {
        let source = Builder::new().read(b"he").read(b"ll").read(b"o!").build();
        let mut reader = BufReader::with_capacity(16, source);

        assert_eq!(reader.peek(5).await.unwrap().unwrap(), b"hello");
        assert_eq!(reader.read_until(b'!').await.unwrap().unwrap(), b"hello!");
    }

    #[tokio::test]
    async fn read_full_reports_partial_prefix() {
        let mut reader = BufReader::new(&b"abc"[..]);
        let mut dst = [0u8; 5];

        let err = reader.read_full(&mut dst).await.unwrap_err();
        assert!(err.is_unexpected_eof());
        assert_eq!(err.partial(), b"abc");

        let mut reader = BufReader::new(&b""[..]);
        assert_eq!(reader.read_full(&mut dst).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_full_collects_every_chunk() {
        let source = Builder::new().read(b"12").read(b"345").read(b"6").build();
        let mut reader = BufReader::with_capacity(16, source);
        let mut dst = [0u8; 6];

        assert_eq!(reader.read_full(&mut dst).await.unwrap(), Some(6));
        assert_eq!(&dst, b"123456");
        assert_eq!(reader.read(&mut dst).await.unwrap(), None);
    }

    #[tokio::test]
    async fn large_read_bypasses_the_buffer() {
        let data: Vec<u8> = (0..64u8).collect();
        let mut reader = BufReader::with_capacity(16, &data[..]);
        let mut dst = [0u8; 32];

        let n = reader.read(&mut dst).await.unwrap().unwrap();
        assert_eq!(n, 32);
        assert_eq!(&dst[..], &data[..32]);
        assert_eq!(reader.buffered(), 0);

        let mut small = [0u8; 4];
        assert_eq!(reader.read(&mut small).await.unwrap(), Some(4));
        assert_eq!(&small, &[32, 33, 34, 35]);
        assert_eq!(reader.buffered(), 12);
    }

    #[tokio::test]
    async fn read_byte_until_eof() {
        let mut reader = BufReader::new(&b"ab"[..]);
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().await.unwrap(), None);
        assert!(reader.is_eof());
    }

    #[tokio::test]
    async fn read_until_returns_remainder_once() {
        let mut reader = BufReader::new(&b"one,two"[..]);

        assert_eq!(reader.read_until(b',').await.unwrap().unwrap(), b"one,");
        assert_eq!(reader.read_until(b',').await.unwrap().unwrap(), b"two");
        assert!(reader.read_until(b',').await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_until_rotates_full_buffer() {
        let data = b"0123456789abcdefXYZ;";
        let mut reader = BufReader::with_capacity(16, &data[..]);

        let err = reader.read_until(b';').await.unwrap_err();
        let partial = err.into_partial();
        assert_eq!(&partial[..], b"0123456789abcdef");
        assert_eq!(reader.buffered(), 0);

        // the handed out bytes are not touched by later reads
        assert_eq!(reader.read_until(b';').await.unwrap().unwrap(), b"XYZ;");
        assert_eq!(&partial[..], b"0123456789abcdef");
    }

    #[tokio::test]
    async fn read_line_strips_terminators() {
        let mut reader = BufReader::new(&b"first\r\nsecond\nthird"[..]);

        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(line, Line { line: Bytes::from_static(b"first"), more: false });

        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(&line.line[..], b"second");

        // trailing fragment exactly once, then eof
        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(&line.line[..], b"third");
        assert!(!line.more);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_line_keeps_straddling_crlf_together() {
        // 15 bytes of payload and the CR fill the 16 byte buffer exactly
        let data = b"aaaaaaaaaaaaaaa\r\nb\r\n";
        let mut reader = BufReader::with_capacity(16, &data[..]);

        let mut lines = Vec::new();
        let mut current = Vec::new();
        while let Some(Line { line, more }) = reader.read_line().await.unwrap() {
            current.extend_from_slice(&line);
            if !more {
                lines.push(std::mem::take(&mut current));
            }
        }

        assert_eq!(lines, vec![b"aaaaaaaaaaaaaaa".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn read_line_long_line_in_fragments() {
        let data = b"0123456789abcdefghij\n";
        let mut reader = BufReader::with_capacity(16, &data[..]);

        let first = reader.read_line().await.unwrap().unwrap();
        assert!(first.more);
        assert_eq!(&first.line[..], b"0123456789abcdef");

        let second = reader.read_line().await.unwrap().unwrap();
        assert!(!second.more);
        assert_eq!(&second.line[..], b"ghij");
    }

    #[tokio::test]
    async fn interrupted_source_fails_without_progress() {
        let mut reader = BufReader::new(Interrupting);
        let err = reader.read_byte().await.unwrap_err();
        assert!(matches!(err, BufError::NoProgress(MAX_CONSECUTIVE_EMPTY_READS)));
    }

    #[tokio::test]
    async fn reset_clears_eof() {
        let mut reader = BufReader::new(&b"x"[..]);
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'x'));
        assert_eq!(reader.read_byte().await.unwrap(), None);

        reader.reset(&b"y"[..]);
        assert!(!reader.is_eof());
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'y'));
    }

    #[tokio::test]
    async fn works_as_async_read() {
        let mut reader = BufReader::with_capacity(16, &b"stream of bytes"[..]);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "stream of bytes");
    }
}
