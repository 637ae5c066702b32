//! Buffered writer with a sticky error.
//!
//! Once a write to the sink fails the writer keeps returning that failure
//! until [`BufWriter::reset`] installs a new sink, so a caller that ignores
//! one error cannot interleave later bytes after a gap.

use std::cmp;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::reader::{DEFAULT_BUF_SIZE, MIN_BUF_SIZE};

#[derive(Debug)]
pub struct BufWriter<W> {
    inner: W,
    buf: Box<[u8]>,
    n: usize,
    err: Option<Arc<io::Error>>,
}

impl<W> BufWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    pub fn with_capacity(capacity: usize, inner: W) -> Self {
        let capacity = cmp::max(capacity, MIN_BUF_SIZE);
        Self { inner, buf: vec![0; capacity].into_boxed_slice(), n: 0, err: None }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.buf.len() - self.n
    }

    /// Drops buffered bytes and the stored error and writes to `inner` from now on.
    pub fn reset(&mut self, inner: W) {
        self.inner = inner;
        self.n = 0;
        self.err = None;
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check(&self) -> io::Result<()> {
        match &self.err {
            Some(e) => Err(io::Error::new(e.kind(), Arc::clone(e))),
            None => Ok(()),
        }
    }

    fn fail(&mut self, e: io::Error) -> io::Error {
        debug!(cause = %e, "buffered writer failed, error is now sticky");
        let e = Arc::new(e);
        self.err = Some(Arc::clone(&e));
        io::Error::new(e.kind(), e)
    }

    fn copy_in(&mut self, data: &[u8]) -> usize {
        let len = cmp::min(data.len(), self.available());
        self.buf[self.n..self.n + len].copy_from_slice(&data[..len]);
        self.n += len;
        len
    }
}

impl<W: AsyncWrite + Unpin> BufWriter<W> {
    async fn write_buffered(&mut self) -> io::Result<()> {
        if self.n == 0 {
            return Ok(());
        }
        if let Err(e) = self.inner.write_all(&self.buf[..self.n]).await {
            return Err(self.fail(e));
        }
        self.n = 0;
        Ok(())
    }

    /// Writes all buffered bytes and flushes the sink.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.write_buffered().await?;
        if let Err(e) = self.inner.flush().await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// Buffers `data`, writing to the sink whenever the buffer fills.
    ///
    /// Data larger than the free space is written straight through while the
    /// buffer is empty. Returns `data.len()` on success.
    pub async fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        self.check()?;
        let total = data.len();

        while data.len() > self.available() {
            if self.n == 0 {
                match self.inner.write(data).await {
                    Ok(0) => return Err(self.fail(io::ErrorKind::WriteZero.into())),
                    Ok(written) => data = &data[written..],
                    Err(e) => return Err(self.fail(e)),
                }
            } else {
                let copied = self.copy_in(data);
                data = &data[copied..];
                self.write_buffered().await?;
            }
        }

        self.copy_in(data);
        Ok(total)
    }
}
