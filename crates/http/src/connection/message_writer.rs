use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, TRAILER};
use http::{HeaderMap, HeaderValue, Version};
use http_body_util::BodyExt;
use micro_bufio::BufWriter;
use tokio::io::AsyncWrite;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::codec::{ResponseEncoder, ResponseHead};
use crate::protocol::{Message, PayloadItem, PayloadSize, Response, ResponseBody, SendError, validate_trailers};

/// Encodes whole responses into a staging buffer and pushes them through
/// the connection's buffered writer.
#[derive(Debug)]
pub(crate) struct MessageWriter<W> {
    writer: BufWriter<W>,
    buffer: BytesMut,
    encoder: ResponseEncoder,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn with_capacity(writer: W, buffer_size: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(buffer_size, writer),
            buffer: BytesMut::with_capacity(buffer_size),
            encoder: ResponseEncoder::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Writes raw bytes, for interim responses.
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        self.writer.write(bytes).await?;
        Ok(self.writer.flush().await?)
    }

    /// Writes `response` and flushes the transport.
    ///
    /// `version` is the request's version. It decides how `keep_alive` is
    /// announced: HTTP/1.0 needs an explicit `connection: keep-alive`, and
    /// any response that ends the connection says `connection: close`.
    pub(crate) async fn send_response(&mut self, response: Response, version: Version, keep_alive: bool) -> Result<(), SendError> {
        self.buffer.clear();
        let result = self.encode_response(response, version, keep_alive).await;
        if result.is_err() {
            // leave the encoder ready in case the writer is reused
            self.encoder = ResponseEncoder::new();
        }
        result
    }

    async fn encode_response(&mut self, response: Response, version: Version, keep_alive: bool) -> Result<(), SendError> {
        let (status, mut headers, body, trailers) = response.into_parts();

        if !keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        } else if version == Version::HTTP_10 {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let mut declared = HeaderMap::new();
        let payload_size = if trailers.is_some() {
            for value in headers.get_all(TRAILER) {
                declared.append(TRAILER, value.clone());
            }
            validate_trailers(&declared, &HeaderMap::new())?;
            PayloadSize::Chunked
        } else {
            body.payload_size()
        };

        trace!(%status, ?payload_size, "writing response head");
        self.encode(Message::Header((status, headers, payload_size)))?;

        match body {
            ResponseBody::Empty => {}
            ResponseBody::Bytes(bytes) => self.encode(Message::Payload(PayloadItem::Chunk(bytes)))?,
            ResponseBody::Stream(mut body) => {
                while let Some(frame) = body.frame().await {
                    let frame = frame.map_err(|e| SendError::invalid_body(format!("response body failed: {e}")))?;
                    match frame.into_data() {
                        Ok(data) => self.encode(Message::Payload(PayloadItem::Chunk(data)))?,
                        Err(_) => debug!("ignoring trailers frame of a response body"),
                    }
                    if self.buffer.len() >= self.writer.size() {
                        self.write_buffer().await?;
                    }
                }
            }
        }

        match trailers {
            Some(trailers) => {
                let fields = trailers().await;
                validate_trailers(&declared, &fields)?;
                self.encode(Message::Payload(PayloadItem::Trailers(fields)))?;
            }
            None => self.encode(Message::Payload(PayloadItem::Eof))?,
        }

        self.write_buffer().await?;
        Ok(self.writer.flush().await?)
    }

    fn encode(&mut self, item: Message<ResponseHead, Bytes>) -> Result<(), SendError> {
        self.encoder.encode(item, &mut self.buffer)
    }

    async fn write_buffer(&mut self) -> Result<(), SendError> {
        if !self.buffer.is_empty() {
            self.writer.write(&self.buffer).await?;
            self.buffer.clear();
        }
        Ok(())
    }
}
