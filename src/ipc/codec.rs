//! Wire I/O for framed messages.
//!
//! Reads and writes a message in two phases (header, then payload) directly
//! into and out of the message's own buffers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::ipc::message::Message;

/// ReadingHeader: fill the header in place, then decode it.
///
/// For the variable framing this sizes the payload storage.
pub async fn read_header<M, R>(reader: &mut R, message: &mut M) -> Result<()>
where
    M: Message,
    R: AsyncRead + Unpin,
{
    reader.read_exact(message.header_buffer()).await?;
    message.commit_header();
    message.decode()
}

/// ReadingPayload: fill exactly `payload_length()` bytes in place.
pub async fn read_payload<M, R>(reader: &mut R, message: &mut M) -> Result<()>
where
    M: Message,
    R: AsyncRead + Unpin,
{
    if message.payload_length() > 0 {
        reader.read_exact(message.payload_buffer()).await?;
    }
    Ok(())
}

/// WritingHeader.
pub async fn write_header<M, W>(writer: &mut W, message: &M) -> Result<()>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.header()).await?;
    Ok(())
}

/// WritingPayload, flushing the completed message.
pub async fn write_payload<M, W>(writer: &mut W, message: &M) -> Result<()>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    if message.payload_length() > 0 {
        writer.write_all(message.payload()).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read one complete message into `message`.
pub async fn read_message<M, R>(reader: &mut R, message: &mut M) -> Result<()>
where
    M: Message,
    R: AsyncRead + Unpin,
{
    read_header(reader, message).await?;
    read_payload(reader, message).await
}

/// Write one complete message: header, then payload.
pub async fn write_message<M, W>(writer: &mut W, message: &M) -> Result<()>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    write_header(writer, message).await?;
    write_payload(writer, message).await
}
