//! Frame decoding.
//!
//! A Decoder pulls exactly one frame off a connection. Control payloads are
//! read into memory; stream frames are reported as a bare marker and the
//! body is left unread for the consumer.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use ggnet_core::wire::{FrameType, DEFAULT_MAX_CONTROL_LEN};

use crate::error::DecodeError;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(Bytes),
    Stream,
}

#[async_trait]
pub trait Decoder: Send + Sync {
    /// Consume one frame from `reader`.
    ///
    /// Errors for which [`DecodeError::is_fatal`] is true mean the
    /// connection itself failed; anything else is a malformed frame.
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Frame, DecodeError>;
}

/// The default decoder: `[type][u32 BE len][payload]` for control frames.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedDecoder {
    max_control_len: u32,
}

impl LengthPrefixedDecoder {
    pub fn new(max_control_len: u32) -> Self {
        Self { max_control_len }
    }
}

impl Default for LengthPrefixedDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTROL_LEN)
    }
}

#[async_trait]
impl Decoder for LengthPrefixedDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Frame, DecodeError> {
        let type_byte = reader.read_u8().await?;
        match FrameType::try_from(type_byte)? {
            FrameType::Stream => Ok(Frame::Stream),
            FrameType::Control => {
                let len = reader.read_u32().await?;
                if len > self.max_control_len {
                    // Skip the payload so the next frame starts aligned.
                    let mut skip = (&mut *reader).take(u64::from(len));
                    let skipped = tokio::io::copy(&mut skip, &mut tokio::io::sink()).await?;
                    if skipped < u64::from(len) {
                        return Err(DecodeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                    }
                    return Err(DecodeError::ControlTooLarge {
                        len,
                        max: self.max_control_len,
                    });
                }
                let mut payload = vec![0u8; len as usize];
                reader.read_exact(&mut payload).await?;
                Ok(Frame::Control(Bytes::from(payload)))
            }
        }
    }
}
