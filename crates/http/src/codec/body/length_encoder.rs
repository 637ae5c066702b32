use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, SendError};

/// Writes payload chunks as they are, checking them against the announced
/// Content-Length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn is_finish(&self) -> bool {
        self.length == 0
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                let len = bytes.remaining() as u64;
                if len > self.length {
                    warn!(len, remaining = self.length, "body exceeds content-length");
                    return Err(SendError::invalid_body("body is longer than its content-length"));
                }
                dst.put(bytes);
                self.length -= len;
                Ok(())
            }
            PayloadItem::Eof if self.length == 0 => Ok(()),
            PayloadItem::Eof => Err(SendError::invalid_body(format!("body ended {} bytes short of its content-length", self.length))),
            PayloadItem::Trailers(_) => Err(SendError::invalid_trailer("trailers need a chunked body")),
        }
    }
}
