//! Wire format of the hook-tool socket.
//!
//! Each message is a 9-byte big-endian header followed by a CBOR payload:
//!
//! ```text
//! +----------------+-----+----------------+-----------------+
//! | payload len u32| tag | CRC32 (u32)    | payload (CBOR)  |
//! +----------------+-----+----------------+-----------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::message::{ErrorInfo, ToolRequest, ToolResponse};

/// Largest payload accepted by default.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Length of the header preceding every payload.
pub const HEADER_LEN: usize = 9;

const TAG_REQUEST: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;
const TAG_REJECTED: u8 = 0x03;
const TAG_CLOSE: u8 = 0x04;

/// A message on the hook-tool socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A tool invocation, client to server.
    Request(ToolRequest),

    /// The result of an invocation, server to client.
    Response(ToolResponse),

    /// The server refused to dispatch the request.
    Rejected(ErrorInfo),

    /// The client is done with the connection.
    Close,
}

impl Message {
    const fn tag(&self) -> u8 {
        match self {
            Self::Request(_) => TAG_REQUEST,
            Self::Response(_) => TAG_RESPONSE,
            Self::Rejected(_) => TAG_REJECTED,
            Self::Close => TAG_CLOSE,
        }
    }

    /// Short name for logs and errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Rejected(_) => "rejected",
            Self::Close => "close",
        }
    }
}

/// Encodes and decodes [`Message`]s.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    limit: usize,
}

impl MessageCodec {
    /// A codec refusing payloads larger than `limit` bytes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }

    const fn check_size(&self, size: usize) -> Result<(), WireError> {
        if size > self.limit {
            return Err(WireError::TooLarge {
                size,
                max: self.limit,
            });
        }
        Ok(())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(value, &mut payload).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(payload)
}

fn from_cbor<T: DeserializeOwned>(payload: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(payload).map_err(|e| WireError::Decode(e.to_string()))
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &buf[..HEADER_LEN];
        let len = header.get_u32() as usize;
        let tag = header.get_u8();
        let checksum = header.get_u32();
        self.check_size(len)?;

        if buf.len() < HEADER_LEN + len {
            buf.reserve(HEADER_LEN + len - buf.len());
            return Ok(None);
        }
        buf.advance(HEADER_LEN);
        let payload = buf.split_to(len);

        let actual = crc32fast::hash(&payload);
        if actual != checksum {
            return Err(WireError::Checksum {
                expected: checksum,
                actual,
            });
        }

        let message = match tag {
            TAG_REQUEST => Message::Request(from_cbor(&payload)?),
            TAG_RESPONSE => Message::Response(from_cbor(&payload)?),
            TAG_REJECTED => Message::Rejected(from_cbor(&payload)?),
            TAG_CLOSE => Message::Close,
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), WireError> {
        let payload = match &message {
            Message::Request(request) => to_cbor(request)?,
            Message::Response(response) => to_cbor(response)?,
            Message::Rejected(info) => to_cbor(info)?,
            Message::Close => Vec::new(),
        };
        self.check_size(payload.len())?;
        let len = u32::try_from(payload.len()).map_err(|_| WireError::TooLarge {
            size: payload.len(),
            max: self.limit,
        })?;

        buf.reserve(HEADER_LEN + payload.len());
        buf.put_u32(len);
        buf.put_u8(message.tag());
        buf.put_u32(crc32fast::hash(&payload));
        buf.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn encoded(message: Message) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageCodec::default().encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_request_decodes_after_header_arrives() {
        let request = ToolRequest::new("ctx", "relation-get", vec!["-".to_string()], "/charm");
        let full = encoded(Message::Request(request.clone()));

        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&full[..HEADER_LEN - 1]);
        assert_matches!(codec.decode(&mut buf), Ok(None));

        buf.extend_from_slice(&full[HEADER_LEN - 1..full.len() - 1]);
        assert_matches!(codec.decode(&mut buf), Ok(None));

        buf.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Request(request)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_messages_in_one_read() {
        let mut buf = encoded(Message::Response(ToolResponse::success("True\n")));
        buf.extend_from_slice(&encoded(Message::Close));

        let mut codec = MessageCodec::default();
        assert_matches!(codec.decode(&mut buf), Ok(Some(Message::Response(r))) if r.stdout == b"True\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Close));
        assert_matches!(codec.decode(&mut buf), Ok(None));
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut buf = encoded(Message::Response(ToolResponse::failure(1, "boom")));
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        assert_matches!(
            MessageCodec::default().decode(&mut buf),
            Err(WireError::Checksum { .. })
        );
    }

    #[test]
    fn test_size_limit_applies_both_ways() {
        let mut codec = MessageCodec::new(8);
        let mut buf = BytesMut::new();
        let response = ToolResponse::success("far more than eight bytes");
        assert_matches!(
            codec.encode(Message::Response(response), &mut buf),
            Err(WireError::TooLarge { max: 8, .. })
        );

        buf.put_u32(1024);
        buf.put_u8(TAG_RESPONSE);
        buf.put_u32(0);
        assert_matches!(codec.decode(&mut buf), Err(WireError::TooLarge { size: 1024, .. }));
    }

    #[test]
    fn test_unknown_tag_and_bad_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(0x7f);
        buf.put_u32(crc32fast::hash(&[]));
        assert_matches!(
            MessageCodec::default().decode(&mut buf),
            Err(WireError::UnknownTag(0x7f))
        );

        let garbage = [0xff, 0xff, 0xff];
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_u8(TAG_REQUEST);
        buf.put_u32(crc32fast::hash(&garbage));
        buf.put_slice(&garbage);
        assert_matches!(
            MessageCodec::default().decode(&mut buf),
            Err(WireError::Decode(_))
        );
        assert!(buf.is_empty());
    }
}
