use std::io;

use micro_bufio::BufError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("invalid boundary: {reason}")]
    InvalidBoundary { reason: &'static str },

    #[error("invalid content type: {reason}")]
    InvalidContentType { reason: String },

    #[error("malformed multipart body: {reason}")]
    Malformed { reason: String },

    #[error("invalid part header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unexpected eof in multipart body")]
    UnexpectedEof,

    #[error("message too large")]
    MessageTooLarge,

    #[error("multipart writer is closed")]
    WriterClosed,

    #[error("buffered read error: {source}")]
    Buf {
        #[from]
        source: BufError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl MultipartError {
    pub fn invalid_boundary(reason: &'static str) -> Self {
        Self::InvalidBoundary { reason }
    }

    pub fn invalid_content_type<S: ToString>(reason: S) -> Self {
        Self::InvalidContentType { reason: reason.to_string() }
    }

    pub fn malformed<S: ToString>(reason: S) -> Self {
        Self::Malformed { reason: reason.to_string() }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }
}
