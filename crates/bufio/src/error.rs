use std::io;

use bytes::Bytes;
use thiserror::Error;

/// Failure of a buffered read.
///
/// End of stream is not an error: buffered reads return `Ok(None)` for it.
/// Every variant that can happen in the middle of a logical unit (a line, a
/// delimited chunk, a fixed size read) carries the bytes that were already
/// identified as belonging to that unit, so callers can recover them instead
/// of losing progress.
#[derive(Debug, Error)]
pub enum BufError {
    #[error("buffer full, {} bytes pending without delimiter", partial.len())]
    BufferFull { partial: Bytes },

    #[error("unexpected eof, only {} bytes read", partial.len())]
    UnexpectedEof { partial: Bytes },

    #[error("no progress after {0} consecutive empty reads")]
    NoProgress(usize),

    #[error("io error: {source}")]
    Io {
        #[source]
        source: io::Error,
        partial: Bytes,
    },
}

impl BufError {
    pub fn buffer_full<B: Into<Bytes>>(partial: B) -> Self {
        Self::BufferFull { partial: partial.into() }
    }

    pub fn unexpected_eof<B: Into<Bytes>>(partial: B) -> Self {
        Self::UnexpectedEof { partial: partial.into() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into(), partial: Bytes::new() }
    }

    /// Bytes processed before the failure, empty when there were none.
    pub fn partial(&self) -> &[u8] {
        match self {
            Self::BufferFull { partial } | Self::UnexpectedEof { partial } | Self::Io { partial, .. } => partial,
            Self::NoProgress(_) => &[],
        }
    }

    pub fn into_partial(self) -> Bytes {
        match self {
            Self::BufferFull { partial } | Self::UnexpectedEof { partial } | Self::Io { partial, .. } => partial,
            Self::NoProgress(_) => Bytes::new(),
        }
    }

    /// Replaces the attached partial payload.
    ///
    /// `NoProgress` has no payload and is returned unchanged.
    #[must_use]
    pub fn with_partial<B: Into<Bytes>>(self, partial: B) -> Self {
        match self {
            Self::BufferFull { .. } => Self::BufferFull { partial: partial.into() },
            Self::UnexpectedEof { .. } => Self::UnexpectedEof { partial: partial.into() },
            Self::Io { source, .. } => Self::Io { source, partial: partial.into() },
            e @ Self::NoProgress(_) => e,
        }
    }

    #[inline]
    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Self::BufferFull { .. })
    }

    #[inline]
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof { .. })
    }
}

impl From<io::Error> for BufError {
    fn from(e: io::Error) -> Self {
        Self::io(e)
    }
}

impl From<BufError> for io::Error {
    fn from(e: BufError) -> Self {
        match e {
            BufError::Io { source, .. } => source,
            e @ BufError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            e @ BufError::BufferFull { .. } => io::Error::new(io::ErrorKind::OutOfMemory, e),
            e @ BufError::NoProgress(_) => io::Error::other(e),
        }
    }
}
