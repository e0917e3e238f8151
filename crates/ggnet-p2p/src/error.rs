use std::io;
use std::net::SocketAddr;

use ggnet_core::WireError;

use crate::connection::ProtocolViolation;
use crate::stream::StreamAbandoned;

/// Failures surfaced to callers of the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to dial {addr}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transport is already listening on {0}")]
    AlreadyListening(SocketAddr),
}

/// Failure to decode one frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("control payload of {len} bytes exceeds limit of {max}")]
    ControlTooLarge { len: u32, max: u32 },
}

impl DecodeError {
    /// True when the connection itself is broken rather than one frame
    /// being malformed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Io(_))
    }
}

/// Why a connection's serving task stopped. Never escapes the transport;
/// it is logged when the connection is dropped.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0:#}")]
    Handshake(anyhow::Error),

    #[error("peer rejected: {0:#}")]
    Rejected(anyhow::Error),

    #[error(transparent)]
    Decode(DecodeError),

    #[error("{0} consecutive malformed frames")]
    TooManyDecodeFailures(u32),

    #[error(transparent)]
    StreamAbandoned(#[from] StreamAbandoned),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// Only possible once the transport itself is gone.
    #[error("inbound channel closed")]
    ChannelClosed,

    #[error("read half unavailable")]
    ReaderMissing,
}
