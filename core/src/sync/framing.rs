//! Length-prefixed message framing for TCP transport
//!
//! Each frame is a 4-byte big-endian length followed by a JSON-encoded
//! [`Message`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::MAX_MESSAGE_SIZE;
use crate::protocol::Message;
use crate::{Error, Result};

/// Read one length-prefixed payload.
///
/// Returns an error if the announced length exceeds MAX_MESSAGE_SIZE, before
/// any of the payload is read.
pub async fn read_framed_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await
        .map_err(|e| Error::Network(e.to_string()))?;

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "message too large: {} bytes (max {})",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(payload)
}

/// Write one length-prefixed payload and flush.
pub async fn write_framed_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "message too large: {} bytes (max {})",
            payload.len(), MAX_MESSAGE_SIZE
        )));
    }

    let len_bytes = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer.write_all(payload).await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer.flush().await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

/// Read and decode one [`Message`].
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let payload = read_framed_message(reader).await?;
    Message::from_bytes(&payload)
        .map_err(|e| Error::InvalidMessage(format!("undecodable frame: {}", e)))
}

/// Encode and write one [`Message`].
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let payload = message.to_bytes()?;
    write_framed_message(writer, &payload).await
}
