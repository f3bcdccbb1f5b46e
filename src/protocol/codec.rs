use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, MAX_FRAME_LEN};
use crate::radio::Datagram;
use super::message::{Message, MessageFrame, MessageHeader, MessageType, HEADER_LEN};

/// Codec between protocol messages and transport payload bytes.
///
/// The transport delivers whole datagrams, so one decode consumes the entire
/// buffer. Buffers shorter than the header carry no message and are left for
/// the caller to discard.
#[derive(Clone, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new message codec
    pub fn new() -> Self {
        MessageCodec
    }

    /// Encodes a message into a fresh buffer
    pub fn encode_message(&mut self, message: Message) -> Result<BytesMut, Error> {
        let mut dst = BytesMut::with_capacity(message.encoded_len());
        self.encode(message, &mut dst)?;
        Ok(dst)
    }

    /// Decodes a received datagram, `None` if it is too short to hold a header
    pub fn decode_datagram(&mut self, datagram: &Datagram) -> Option<MessageFrame> {
        let mut src = BytesMut::from(&datagram.data[..]);
        match self.decode(&mut src) {
            Ok(Some(message)) => Some(MessageFrame {
                from: datagram.from,
                to: datagram.to,
                message,
            }),
            _ => None,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let message_type = MessageType::from(src.get_u8());
        let sequence_id = src.get_u16();
        let payload = src.split().freeze();

        Ok(Some(Message {
            header: MessageHeader {
                message_type,
                sequence_id,
            },
            payload,
        }))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len();
        if len > MAX_FRAME_LEN {
            return Err(Error::codec(format!(
                "message of {} bytes exceeds frame limit of {}",
                len, MAX_FRAME_LEN
            )));
        }

        dst.reserve(len);
        dst.put_u8(item.header.message_type.into());
        dst.put_u16(item.header.sequence_id);
        dst.extend_from_slice(&item.payload);

        Ok(())
    }
}
