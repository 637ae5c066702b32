//! Streaming delimiter scanner.
//!
//! [`DelimiterDecoder`] splits a byte stream on an arbitrary multi-byte
//! delimiter using Knuth-Morris-Pratt matching. The failure table is built once
//! and the match position survives refills, so every input byte is inspected a
//! bounded number of times no matter how the source chunks its reads.
//!
//! Joining the produced chunks with the delimiter reproduces the input exactly:
//! the delimiter is stripped from each chunk and whatever follows the last
//! delimiter is yielded once at end of stream, even when it is empty.

use std::cmp;
use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, future};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DelimiterDecoder {
    delim: Box<[u8]>,
    lps: Box<[usize]>,
    /// Position of the next byte of the pending buffer to inspect.
    inspect_index: usize,
    /// Number of delimiter bytes matched so far.
    match_index: usize,
    finished: bool,
}

impl DelimiterDecoder {
    /// Creates a decoder for `delim`. An empty delimiter is rejected.
    pub fn new(delim: &[u8]) -> io::Result<Self> {
        if delim.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "delimiter must not be empty"));
        }

        Ok(Self {
            delim: delim.into(),
            lps: build_lps(delim).into_boxed_slice(),
            inspect_index: 0,
            match_index: 0,
            finished: false,
        })
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delim
    }
}

/// Longest proper prefix of `delim[..=i]` that is also a suffix of it, per `i`.
fn build_lps(delim: &[u8]) -> Vec<usize> {
    let mut lps = vec![0; delim.len()];
    let mut len = 0;
    let mut i = 1;

    while i < delim.len() {
        if delim[i] == delim[len] {
            len += 1;
            lps[i] = len;
            i += 1;
        } else if len == 0 {
            i += 1;
        } else {
            len = lps[len - 1];
        }
    }

    lps
}

impl Decoder for DelimiterDecoder {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while self.inspect_index < src.len() {
            if src[self.inspect_index] == self.delim[self.match_index] {
                self.inspect_index += 1;
                self.match_index += 1;

                if self.match_index == self.delim.len() {
                    let mut chunk = src.split_to(self.inspect_index);
                    chunk.truncate(self.inspect_index - self.delim.len());
                    self.inspect_index = 0;
                    self.match_index = 0;
                    return Ok(Some(chunk.freeze()));
                }
            } else if self.match_index == 0 {
                self.inspect_index += 1;
            } else {
                self.match_index = self.lps[self.match_index - 1];
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }

        if self.finished {
            return Ok(None);
        }

        self.finished = true;
        self.inspect_index = 0;
        self.match_index = 0;
        Ok(Some(src.split().freeze()))
    }
}

/// Splits `reader` on `delim`.
///
/// A read error ends the stream silently; anything accumulated since the last
/// delimiter is discarded in that case.
pub fn read_delim<R>(reader: R, delim: &[u8]) -> io::Result<impl Stream<Item = Bytes>>
where
    R: AsyncRead + Unpin,
{
    let decoder = DelimiterDecoder::new(delim)?;
    let capacity = cmp::max(1024, delim.len() + 1);

    Ok(FramedRead::with_capacity(reader, decoder, capacity).scan((), |_, item| {
        future::ready(match item {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                debug!(cause = %e, "delimited read stopped");
                None
            }
        })
    }))
}

/// Like [`read_delim`], decoding every chunk as UTF-8 with replacement.
pub fn read_string_delim<R>(reader: R, delim: &str) -> io::Result<impl Stream<Item = String>>
where
    R: AsyncRead + Unpin,
{
    Ok(read_delim(reader, delim.as_bytes())?.map(|chunk| String::from_utf8_lossy(&chunk).into_owned()))
}

/// Splits `reader` into lines, dropping `\n` and a `\r` before it.
pub fn read_lines<R>(reader: R) -> impl Stream<Item = String>
where
    R: AsyncRead + Unpin,
{
    let decoder = DelimiterDecoder {
        delim: Box::new([b'\n']),
        lps: Box::new([0]),
        inspect_index: 0,
        match_index: 0,
        finished: false,
    };

    FramedRead::with_capacity(reader, decoder, 1024)
        .scan((), |_, item| future::ready(item.ok()))
        .map(|mut chunk| {
            if chunk.last() == Some(&b'\r') {
                chunk.truncate(chunk.len() - 1);
            }
            String::from_utf8_lossy(&chunk).into_owned()
        })
}
