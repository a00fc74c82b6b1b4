//! Wire protocol utilities
//!
//! Async framing helpers for reading and writing handshakes and messages
//! over any byte stream.

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use super::{Handshake, Message};
use crate::error::TorrentError;

/// Read one complete message frame from the stream
///
/// A zero length prefix yields [`Message::KeepAlive`] without any further
/// reads.
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        trace!("Received keep-alive");
        return Ok(Message::KeepAlive);
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    let mut frame = BytesMut::with_capacity(4 + length);
    frame.put_slice(&length_buf);
    frame.put_slice(&payload);

    Message::deserialize(&frame)
}

/// Write a message frame to the stream
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a handshake from the stream
pub async fn read_handshake<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut pstrlen_buf = [0u8; 1];
    reader.read_exact(&mut pstrlen_buf).await?;

    let pstrlen = pstrlen_buf[0] as usize;
    if pstrlen == 0 {
        return Err(TorrentError::protocol_error("Handshake pstrlen cannot be zero").into());
    }

    // <pstr><8 reserved><20 info_hash><20 peer_id>
    let mut rest = vec![0u8; pstrlen + 48];
    reader.read_exact(&mut rest).await?;

    let mut frame = BytesMut::with_capacity(1 + rest.len());
    frame.put_u8(pstrlen_buf[0]);
    frame.put_slice(&rest);

    Handshake::deserialize(&frame)
}

/// Write a handshake to the stream
pub async fn write_handshake<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    handshake: &Handshake,
) -> Result<()> {
    writer.write_all(&handshake.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_message_write_read() {
        let message = Message::Request { index: 3, begin: 16384, length: 16384 };

        let mut buf = Cursor::new(Vec::new());
        write_message(&mut buf, &message).await.unwrap();

        let mut reader = Cursor::new(buf.into_inner());
        let read = read_message(&mut reader).await.unwrap();
        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn test_keepalive_write_read() {
        let mut buf = Cursor::new(Vec::new());
        write_message(&mut buf, &Message::KeepAlive).await.unwrap();

        let bytes = buf.into_inner();
        assert_eq!(bytes, vec![0, 0, 0, 0]);

        let mut reader = Cursor::new(bytes);
        assert_eq!(read_message(&mut reader).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_handshake_write_read() {
        let handshake = Handshake::new([7u8; 20], [9u8; 20]);

        let mut buf = Cursor::new(Vec::new());
        write_handshake(&mut buf, &handshake).await.unwrap();

        let bytes = buf.into_inner();
        assert_eq!(bytes.len(), 68);

        let mut reader = Cursor::new(bytes);
        let read = read_handshake(&mut reader).await.unwrap();
        assert_eq!(read, handshake);
    }

    #[tokio::test]
    async fn test_read_handshake_zero_pstrlen() {
        let mut reader = Cursor::new(vec![0u8; 68]);
        assert!(read_handshake(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_truncated_stream() {
        // Length prefix promises 13 bytes but the stream ends early.
        let mut reader = Cursor::new(vec![0, 0, 0, 13, 6]);
        assert!(read_message(&mut reader).await.is_err());
    }
}
