//! Framed message transport over any async byte stream.
//!
//! Format: [i32 big-endian type][i32 big-endian length][payload]

use crate::protocol::Message;
use crate::MAX_PAYLOAD;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that can occur while framing or decoding messages
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("Negative payload length: {0}")]
    NegativeLength(i32),
    #[error("Expected message type {expected}, got {actual}")]
    UnexpectedType { expected: i32, actual: i32 },
    #[error("Malformed payload: {0}")]
    Payload(String),
    #[error("Payload codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Write one framed message, draining short writes.
pub async fn send_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    if message.payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::MessageTooLarge(
            message.payload.len(),
            MAX_PAYLOAD,
        ));
    }

    let mut frame = Vec::with_capacity(8 + message.payload.len());
    frame.extend_from_slice(&message.msg_type.to_be_bytes());
    frame.extend_from_slice(&(message.payload.len() as i32).to_be_bytes());
    frame.extend_from_slice(&message.payload);

    write_full(stream, &frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// A declared length outside `0..=MAX_PAYLOAD` is a protocol violation; the
/// caller should drop the connection since the stream position is lost.
pub async fn recv_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message, ProtocolError> {
    let mut header = [0u8; 8];
    read_full(stream, &mut header).await?;

    let msg_type = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }
    let len = len as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::MessageTooLarge(len, MAX_PAYLOAD));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        read_full(stream, &mut payload).await?;
    }

    Ok(Message { msg_type, payload })
}

// tokio's read_exact/write_all surface `Interrupted` instead of retrying it,
// so both directions loop by hand.
async fn read_full<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) => return Err(ProtocolError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

async fn write_full<W: AsyncWrite + Unpin>(stream: &mut W, buf: &[u8]) -> Result<(), ProtocolError> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]).await {
            Ok(0) => return Err(ProtocolError::ConnectionClosed),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}
