use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CommunicationError;

pub(crate) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Reads one newline terminated JSON document.
///
/// # Errors
///
/// Returns [`CommunicationError::ConnectionClosed`] on a clean EOF, or an
/// I/O, size, UTF-8 or decoding error.
pub(crate) async fn read_message<R, M>(reader: &mut R) -> Result<M, CommunicationError>
where
    R: AsyncBufRead + Unpin,
    M: DeserializeOwned,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let bytes = reader
        .read_until(b'\n', &mut buffer)
        .await
        .map_err(|err| CommunicationError::Io {
            context: "read wire message",
            source: err,
        })?;
    if bytes == 0 {
        return Err(CommunicationError::ConnectionClosed);
    }
    if buffer.len() > MAX_MESSAGE_BYTES {
        return Err(CommunicationError::WireMessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }
    if buffer.ends_with(b"\n") {
        buffer.pop();
        if buffer.ends_with(b"\r") {
            buffer.pop();
        }
    }
    let line = std::str::from_utf8(&buffer)
        .map_err(|err| CommunicationError::WireMessageInvalidUtf8 { source: err })?;
    serde_json::from_str::<M>(line).map_err(|err| CommunicationError::Deserialize {
        context: "wire message",
        source: err,
    })
}

/// Encodes `message` as a single line.
///
/// # Errors
///
/// Returns an error when the message cannot be serialized.
pub(crate) fn encode_message<M>(message: &M) -> Result<Vec<u8>, CommunicationError>
where
    M: Serialize + ?Sized,
{
    let mut payload = serde_json::to_vec(message).map_err(|err| CommunicationError::Serialize {
        context: "wire message",
        source: err,
    })?;
    payload.push(b'\n');
    Ok(payload)
}

/// Writes one message and flushes.
///
/// # Errors
///
/// Returns an error when serialization or the write fails.
pub(crate) async fn send_message<W, M>(writer: &mut W, message: &M) -> Result<(), CommunicationError>
where
    W: AsyncWrite + Unpin,
    M: Serialize + ?Sized,
{
    let payload = encode_message(message)?;
    write_payload(writer, &payload).await
}

/// Writes an already encoded message and flushes.
///
/// # Errors
///
/// Returns an error when the write fails.
pub(crate) async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> Result<(), CommunicationError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(payload)
        .await
        .map_err(|err| CommunicationError::Io {
            context: "send wire message",
            source: err,
        })?;
    writer.flush().await.map_err(|err| CommunicationError::Io {
        context: "flush wire message",
        source: err,
    })
}
