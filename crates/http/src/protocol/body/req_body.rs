use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::TryStreamExt;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use micro_bufio::BufReader;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::trace;

use crate::codec::PayloadDecoder;
use crate::protocol::{ParseError, PayloadItem};

/// Body of an in-flight request, read through the connection's buffer.
///
/// A body whose connection is already gone yields nothing.
#[derive(Debug)]
pub struct ReqBody<'a, R> {
    reader: Option<&'a mut BufReader<R>>,
    decoder: &'a mut PayloadDecoder,
}

impl<'a, R> ReqBody<'a, R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(reader: Option<&'a mut BufReader<R>>, decoder: &'a mut PayloadDecoder) -> Self {
        Self { reader, decoder }
    }

    /// Polls the next body chunk.
    ///
    /// Decodes from the buffered window first and only reads from the
    /// transport once the window is used up.
    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, ParseError>>> {
        let Some(reader) = self.reader.as_deref_mut() else {
            return Poll::Ready(None);
        };

        loop {
            let mut window = reader.buffer();
            let available = window.len();
            let decoded = self.decoder.decode(&mut window);
            let consumed = available - window.len();
            reader.consume(consumed);

            match decoded {
                Ok(Some(PayloadItem::Chunk(bytes))) => {
                    trace!(len = bytes.len(), "read request body chunk");
                    return Poll::Ready(Some(Ok(bytes)));
                }
                Ok(Some(PayloadItem::Eof | PayloadItem::Trailers(_))) => return Poll::Ready(None),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }

            if reader.is_eof() {
                return Poll::Ready(Some(Err(ParseError::UnexpectedEof)));
            }
            if let Err(e) = ready!(reader.poll_fill(cx)) {
                return Poll::Ready(Some(Err(e.into())));
            }
        }
    }

    /// Reads and discards the rest of the body, returning how many bytes
    /// were skipped.
    pub async fn drain(&mut self) -> Result<u64, ParseError> {
        let mut skipped = 0;
        while let Some(chunk) = std::future::poll_fn(|cx| self.poll_chunk(cx)).await {
            skipped += chunk?.len() as u64;
        }
        Ok(skipped)
    }

    /// Collects the whole body into one buffer.
    pub async fn bytes(self) -> Result<Bytes, ParseError> {
        Ok(self.collect().await?.to_bytes())
    }

    /// Adapts the body to `AsyncRead`. Decode failures surface as
    /// `io::Error`s.
    pub fn into_async_read(self) -> impl AsyncRead + Unpin + 'a
    where
        R: 'a,
    {
        StreamReader::new(self.into_data_stream().map_err(io::Error::from))
    }

    /// Reads the body to its end into a `Vec`.
    pub async fn read_to_end(self, dst: &mut Vec<u8>) -> io::Result<usize> {
        self.into_async_read().read_to_end(dst).await
    }
}

impl<R> Body for ReqBody<'_, R>
where
    R: AsyncRead + Unpin,
{
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().poll_chunk(cx).map(|chunk| chunk.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.reader.is_none() || self.decoder.is_finish()
    }

    fn size_hint(&self) -> SizeHint {
        match self.decoder.remaining() {
            Some(n) => SizeHint::with_exact(n),
            None => SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadSize;

    #[tokio::test]
    async fn reads_length_body_from_window() {
        let mut reader = BufReader::with_capacity(16, &b"hello worldGET / HTTP/1.1"[..]);
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(11));

        let body = ReqBody::new(Some(&mut reader), &mut decoder);
        assert_eq!(body.size_hint().exact(), Some(11));
        assert_eq!(body.bytes().await.unwrap(), "hello world");

        // the next request stays in the buffer
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"GET / HTTP/1.1");
    }

    #[tokio::test]
    async fn chunked_body_across_reads() {
        let io = tokio_test::io::Builder::new().read(b"5\r\nhel").read(b"lo\r\n6\r\n world").read(b"\r\n0\r\n\r\n").build();
        let mut reader = BufReader::with_capacity(16, io);
        let mut decoder = PayloadDecoder::chunked();

        let body = ReqBody::new(Some(&mut reader), &mut decoder);
        assert_eq!(body.bytes().await.unwrap(), "hello world");
        assert!(decoder.is_finish());
    }

    #[tokio::test]
    async fn truncated_body_is_unexpected_eof() {
        let mut reader = BufReader::new(&b"abc"[..]);
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(10));

        let result = ReqBody::new(Some(&mut reader), &mut decoder).bytes().await;
        assert!(matches!(result, Err(ParseError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn drain_skips_unread_bytes() {
        let mut reader = BufReader::with_capacity(16, &b"0123456789abcdefghijNEXT"[..]);
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(20));

        let mut body = ReqBody::new(Some(&mut reader), &mut decoder);
        assert_eq!(body.drain().await.unwrap(), 20);
        assert_eq!(reader.buffer(), b"NEXT");
    }

    #[tokio::test]
    async fn async_read_adapter() {
        let mut reader = BufReader::new(&b"4\r\nwiki\r\n0\r\n\r\n"[..]);
        let mut decoder = PayloadDecoder::chunked();

        let mut out = Vec::new();
        let n = ReqBody::new(Some(&mut reader), &mut decoder).read_to_end(&mut out).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, b"wiki");
    }

    #[tokio::test]
    async fn detached_body_is_empty() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(3));
        let body = ReqBody::<&[u8]>::new(None, &mut decoder);
        assert!(body.is_end_stream());
        assert!(body.bytes().await.unwrap().is_empty());
    }
}
