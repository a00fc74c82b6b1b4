//! BitTorrent protocol messages
//!
//! Defines all message types used after the handshake. Every frame is
//! `<4-byte big-endian length><1-byte id><payload>`; a zero-length frame is
//! a keep-alive with no id and no payload.

use bytes::{Buf, BufMut, BytesMut};
use anyhow::Result;

use crate::error::TorrentError;

/// BitTorrent message IDs
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
            _ => Err(TorrentError::protocol_error_with_source(
                "Invalid message ID",
                format!("value: {}", value),
            )
            .into()),
        }
    }
}

/// BitTorrent protocol message
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
    /// Get the message ID (None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
        }
    }

    /// Get the frame length (excluding the 4-byte length prefix)
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

    /// Serialize the message to bytes (including the length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }

        match self {
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request { index, begin, length }
            | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            _ => {}
        }

        buf.to_vec()
    }

    /// Deserialize a message from bytes (including the length prefix)
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::from(data);

        if buf.remaining() < 4 {
            return Err(TorrentError::protocol_error("Message frame too short").into());
        }

        let length = buf.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if buf.remaining() < length {
            return Err(TorrentError::protocol_error_with_source(
                "Truncated message frame",
                format!("declared {} bytes, got {}", length, buf.remaining()),
            )
            .into());
        }

        let message_id = MessageId::try_from(buf.get_u8())?;
        let payload_len = length - 1;

        let need = |want: usize| -> Result<()> {
            if payload_len < want {
                return Err(TorrentError::protocol_error_with_source(
                    format!("{:?} message too short", message_id),
                    format!("expected {} payload bytes, got {}", want, payload_len),
                )
                .into());
            }
            Ok(())
        };

        match message_id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                need(4)?;
                Ok(Message::Have { piece_index: buf.get_u32() })
            }
            MessageId::Bitfield => Ok(Message::Bitfield {
                bitfield: buf[..payload_len].to_vec(),
            }),
            MessageId::Request => {
                need(12)?;
                Ok(Message::Request {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
            MessageId::Piece => {
                need(8)?;
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    block: buf[..payload_len - 8].to_vec(),
                })
            }
            MessageId::Cancel => {
                need(12)?;
                Ok(Message::Cancel {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_is_four_zero_bytes() {
        let serialized = Message::KeepAlive.serialize();
        assert_eq!(serialized, vec![0, 0, 0, 0]);
        assert_eq!(Message::deserialize(&serialized).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_round_trip_simple_messages() {
        for message in [
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
        ] {
            let deserialized = Message::deserialize(&message.serialize()).unwrap();
            assert_eq!(deserialized, message);
        }
    }

    #[test]
    fn test_round_trip_have() {
        let message = Message::Have { piece_index: 42 };
        assert_eq!(Message::deserialize(&message.serialize()).unwrap(), message);
    }

    #[test]
    fn test_round_trip_bitfield() {
        let message = Message::Bitfield { bitfield: vec![0b10110000, 0b00000001] };
        assert_eq!(Message::deserialize(&message.serialize()).unwrap(), message);
    }

    #[test]
    fn test_round_trip_request_and_cancel() {
        let request = Message::Request { index: 1, begin: 16384, length: 16384 };
        assert_eq!(Message::deserialize(&request.serialize()).unwrap(), request);

        let cancel = Message::Cancel { index: 1, begin: 16384, length: 16384 };
        assert_eq!(Message::deserialize(&cancel.serialize()).unwrap(), cancel);
    }

    #[test]
    fn test_round_trip_piece() {
        let message = Message::Piece { index: 10, begin: 0, block: vec![1, 2, 3, 4, 5] };
        assert_eq!(Message::deserialize(&message.serialize()).unwrap(), message);
    }

    #[test]
    fn test_request_wire_layout() {
        let bytes = Message::Request { index: 1, begin: 2, length: 3 }.serialize();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );
    }

    #[test]
    fn test_message_lengths() {
        assert_eq!(Message::KeepAlive.length(), 0);
        assert_eq!(Message::Choke.length(), 1);
        assert_eq!(Message::Have { piece_index: 0 }.length(), 5);
        assert_eq!(Message::Request { index: 0, begin: 0, length: 0 }.length(), 13);
        assert_eq!(Message::Piece { index: 0, begin: 0, block: vec![1, 2, 3] }.length(), 12);
    }

    #[test]
    fn test_invalid_message_id() {
        assert!(MessageId::try_from(9).is_err());
        assert!(MessageId::try_from(255).is_err());
        assert_eq!(MessageId::try_from(8).unwrap(), MessageId::Cancel);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        // Declares a 13-byte request but carries only the id.
        let bytes = vec![0, 0, 0, 13, 6];
        assert!(Message::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_short_have_payload_is_error() {
        let bytes = vec![0, 0, 0, 2, 4, 1];
        assert!(Message::deserialize(&bytes).is_err());
    }
}
