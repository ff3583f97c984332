//! Peer-wire messages
//!
//! Every message after the handshake is framed as a 4-byte big-endian length,
//! a 1-byte id and an id-specific payload. A zero length is a keep-alive.

use bytes::{Buf, BufMut, BytesMut};
use anyhow::Result;
use tracing::{error, trace};

use crate::error::TorrentError;

/// Upper bound on a declared frame length
pub const MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

/// Message ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => {
                error!("Invalid message ID: {}", value);
                Err(TorrentError::protocol_error_with_source(
                    "Invalid message ID",
                    format!("value: {}", value)
                ).into())
            }
        }
    }
}

/// Peer-wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Get the message ID (returns None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::KeepAlive => None,
        }
    }

    /// Get the message length (excluding the length prefix)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => {
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                buf.put_slice(bitfield);
            }
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }

        buf.to_vec()
    }

    /// Deserialize a message from bytes (including length prefix)
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut buf = data;

        if buf.remaining() < 4 {
            error!("Message too short: missing length prefix");
            return Err(TorrentError::protocol_error("Message too short: missing length prefix").into());
        }

        let length = buf.get_u32() as usize;
        if length == 0 {
            trace!("Decoded KeepAlive message");
            return Ok(Message::KeepAlive);
        }

        if buf.remaining() != length {
            error!("Frame length mismatch: prefix says {}, got {}", length, buf.remaining());
            return Err(TorrentError::protocol_error_with_source(
                "Frame length mismatch",
                format!("prefix says {}, got {}", length, buf.remaining())
            ).into());
        }

        let message_id = MessageId::try_from(buf.get_u8())?;
        Self::decode_payload(message_id, buf)
    }

    /// Decode the payload that follows `id` in a frame
    pub fn decode_payload(id: MessageId, mut payload: &[u8]) -> Result<Self> {
        let expect = |want: usize, got: usize, name: &str| -> Result<()> {
            if want != got {
                error!("{} message has {} payload bytes, expected {}", name, got, want);
                return Err(TorrentError::protocol_error_with_source(
                    format!("Malformed {} message", name),
                    format!("expected {} payload bytes, got {}", want, got)
                ).into());
            }
            Ok(())
        };

        let message = match id {
            MessageId::Choke => {
                expect(0, payload.remaining(), "Choke")?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect(0, payload.remaining(), "Unchoke")?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect(0, payload.remaining(), "Interested")?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect(0, payload.remaining(), "NotInterested")?;
                Message::NotInterested
            }
            MessageId::Have => {
                expect(4, payload.remaining(), "Have")?;
                Message::Have { piece_index: payload.get_u32() }
            }
            MessageId::Bitfield => Message::Bitfield { bitfield: payload.to_vec() },
            MessageId::Request => {
                expect(12, payload.remaining(), "Request")?;
                Message::Request {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
            MessageId::Piece => {
                if payload.remaining() < 8 {
                    error!("Piece message too short: expected at least 8 bytes, got {}", payload.remaining());
                    return Err(TorrentError::protocol_error_with_source(
                        "Piece message too short",
                        format!("expected at least 8 bytes, got {}", payload.remaining())
                    ).into());
                }
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Message::Piece { index, begin, block: payload.to_vec() }
            }
            MessageId::Cancel => {
                expect(12, payload.remaining(), "Cancel")?;
                Message::Cancel {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
        };

        trace!("Decoded {:?} message", id);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) -> Message {
        Message::deserialize(&message.serialize()).unwrap()
    }

    #[test]
    fn test_every_message_roundtrips() {
        let messages = vec![
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have { piece_index: 42 },
            Message::Bitfield { bitfield: vec![0b1010_0000, 0xFF] },
            Message::Request { index: 1, begin: 16384, length: 16384 },
            Message::Piece { index: 10, begin: 32768, block: vec![1, 2, 3, 4, 5] },
            Message::Cancel { index: 1, begin: 2, length: 3 },
        ];
        for (expected_id, message) in messages.into_iter().enumerate() {
            assert_eq!(message.message_id().map(|id| id as u8), Some(expected_id as u8));
            assert_eq!(roundtrip(message.clone()), message);
        }
    }

    #[test]
    fn test_keepalive_bytes() {
        let serialized = Message::KeepAlive.serialize();
        assert_eq!(serialized, vec![0, 0, 0, 0]);
        assert_eq!(Message::deserialize(&serialized).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_wire_layout_request() {
        let bytes = Message::Request { index: 1, begin: 2, length: 3 }.serialize();
        assert_eq!(bytes, vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
    }

    #[test]
    fn test_message_length() {
        assert_eq!(Message::KeepAlive.length(), 0);
        assert_eq!(Message::Choke.length(), 1);
        assert_eq!(Message::Have { piece_index: 0 }.length(), 5);
        assert_eq!(Message::Request { index: 0, begin: 0, length: 0 }.length(), 13);
        assert_eq!(Message::Piece { index: 0, begin: 0, block: vec![1, 2, 3] }.length(), 12);
    }

    #[test]
    fn test_unknown_id_rejected() {
        assert!(MessageId::try_from(9).is_err());
        assert!(Message::deserialize(&[0, 0, 0, 1, 20]).is_err());
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        // have with 3 bytes
        assert!(Message::deserialize(&[0, 0, 0, 4, 4, 0, 0, 1]).is_err());
        // piece without begin
        assert!(Message::deserialize(&[0, 0, 0, 5, 7, 0, 0, 0, 1]).is_err());
        // choke carrying a payload
        assert!(Message::deserialize(&[0, 0, 0, 2, 0, 9]).is_err());
        // prefix longer than data
        assert!(Message::deserialize(&[0, 0, 0, 9, 4, 0, 0, 0, 1]).is_err());
    }
}
