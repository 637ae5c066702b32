use bytes::{Buf, BytesMut};
use http::{HeaderMap, StatusCode};
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, SendError};

/// The head of a response as the encoder takes it.
pub type ResponseHead = (StatusCode, HeaderMap, PayloadSize);

/// Encodes one response at a time: a head, then payload items until the
/// payload encoder reports it is finished.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Buf> Encoder<Message<ResponseHead, D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<ResponseHead, D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header(head) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                let payload_size = head.2;
                self.header_encoder.encode(head, dst)?;
                self.payload_encoder = Some(payload_size.into());
                Ok(())
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let is_end = payload_item.is_eof();
                let result = payload_encoder.encode(payload_item, dst);
                if is_end || result.is_err() {
                    self.payload_encoder.take();
                }

                result
            }
        }
    }
}
