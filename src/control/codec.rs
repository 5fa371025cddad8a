//! Length-prefixed framing for [`Message`]s.
//!
//! ```text
//! u32 BE  total length of everything after this field
//! u32 BE  header length
//! [..]    JSON-encoded message (header)
//! [..]    raw body (may be empty)
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::Message;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Largest request body that still leaves room for the DISPATCH header.
pub const MAX_BODY_BYTES: usize = MAX_FRAME_BYTES - 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed in the middle of a frame")]
    Truncated,

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// One message plus its (possibly empty) body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Message,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            body: Vec::new(),
        }
    }

    pub fn with_body(message: Message, body: Vec<u8>) -> Self {
        Self { message, body }
    }

    /// Encode including the leading total-length field.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let header = serde_json::to_vec(&self.message)?;
        let total = 4 + header.len() + self.body.len();
        if total > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge {
                len: total,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut buf = Vec::with_capacity(4 + total);
        buf.extend_from_slice(&(total as u32).to_be_bytes());
        buf.extend_from_slice(&(header.len() as u32).to_be_bytes());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Decode the payload that follows the total-length field.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let Some((len_bytes, rest)) = payload.split_first_chunk::<4>() else {
            return Err(FrameError::Malformed("missing header length".into()));
        };
        let header_len = u32::from_be_bytes(*len_bytes) as usize;
        if header_len > rest.len() {
            return Err(FrameError::Malformed(format!(
                "header length {} exceeds frame payload of {} bytes",
                header_len,
                rest.len()
            )));
        }
        let (header, body) = rest.split_at(header_len);
        Ok(Self {
            message: serde_json::from_slice(header)?,
            body: body.to_vec(),
        })
    }
}

/// Write one frame and flush.
pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin),
    frame: &Frame,
) -> Result<(), FrameError> {
    write_encoded(stream, &frame.encode()?).await
}

/// Write bytes produced by [`Frame::encode`] and flush.
pub async fn write_encoded(
    stream: &mut (impl AsyncWrite + Unpin),
    encoded: &[u8],
) -> Result<(), FrameError> {
    stream.write_all(encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Convenience for frames without a body.
pub async fn write_message(
    stream: &mut (impl AsyncWrite + Unpin),
    message: Message,
) -> Result<(), FrameError> {
    write_frame(stream, &Frame::new(message)).await
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames; a close in the middle of a frame is [`FrameError::Truncated`].
pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> Result<Option<Frame>, FrameError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = stream.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;
    Frame::decode(&payload).map(Some)
}
