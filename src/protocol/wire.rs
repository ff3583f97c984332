//! Wire I/O
//!
//! Reads and writes handshakes and framed messages on any async byte stream.
//! A short read (EOF before the declared length) surfaces as an error and ends
//! the connection.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

use crate::error::TorrentError;
use super::handshake::HANDSHAKE_LENGTH;
use super::message::{MessageId, MAX_MESSAGE_LENGTH};
use super::{Handshake, Message};

/// Read exactly one 68-byte handshake
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LENGTH];
    reader.read_exact(&mut buf).await?;
    Handshake::deserialize(&buf)
}

/// Write a handshake and flush
pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, handshake: &Handshake) -> Result<()> {
    writer.write_all(&handshake.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete framed message
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        return Ok(Message::KeepAlive);
    }

    if length > MAX_MESSAGE_LENGTH {
        error!("Declared frame length {} exceeds limit {}", length, MAX_MESSAGE_LENGTH);
        return Err(TorrentError::protocol_error_with_source(
            "Frame too large",
            format!("declared {} bytes, limit {}", length, MAX_MESSAGE_LENGTH)
        ).into());
    }

    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame).await?;

    let id = MessageId::try_from(frame[0])?;
    Message::decode_payload(id, &frame[1..])
}

/// Write a message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_message(&mut client, &Message::Have { piece_index: 7 }).await.unwrap();
        write_message(&mut client, &Message::KeepAlive).await.unwrap();
        write_message(&mut client, &Message::Unchoke).await.unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), Message::Have { piece_index: 7 });
        assert_eq!(read_message(&mut server).await.unwrap(), Message::KeepAlive);
        assert_eq!(read_message(&mut server).await.unwrap(), Message::Unchoke);
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let handshake = Handshake::new([9u8; 20], [8u8; 20]);

        write_handshake(&mut client, &handshake).await.unwrap();
        assert_eq!(read_handshake(&mut server).await.unwrap(), handshake);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0, 0, 0, 13, 6, 0, 0]).await.unwrap();
        drop(client);

        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(read_message(&mut server).await.is_err());
    }
}
