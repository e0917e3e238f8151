//! The ggnet wire format: the bytes that travel between peers.
//!
//! A connection carries a repeating sequence of frames. Each frame starts
//! with a single type byte:
//!
//! ```text
//!   control: [0x01][u32 big-endian length][length bytes of payload]
//!   stream:  [0x02] followed by a body whose length is agreed out of band
//! ```
//!
//! Control frames are small and fully buffered by the receiver. Stream
//! frames leave their body on the wire so the consumer can copy it straight
//! to disk. Changing any constant here is a breaking protocol change.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame types ───────────────────────────────────────────────────────────────

/// Leading byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Length-prefixed payload, decoded entirely into memory.
    Control = 0x01,

    /// Marker only. The body stays on the connection for the consumer.
    Stream = 0x02,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Control),
            0x02 => Ok(FrameType::Stream),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> u8 {
        t as u8
    }
}

/// Size of the control frame length prefix.
pub const CONTROL_LEN_BYTES: usize = 4;

/// The complete on-wire form of a stream frame header.
pub const STREAM_MARKER: [u8; 1] = [FrameType::Stream as u8];

/// Encode a control frame: type byte, big-endian length, payload.
pub fn encode_control(payload: &[u8]) -> Result<Bytes, WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
    let mut buf = BytesMut::with_capacity(1 + CONTROL_LEN_BYTES + payload.len());
    buf.put_u8(FrameType::Control.into());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

// ── Handshake preamble ────────────────────────────────────────────────────────

/// Sent by both sides of a version handshake before any frame.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct HandshakeHello {
    /// Always HANDSHAKE_MAGIC.
    pub magic: [u8; 2],

    /// Protocol version of the sender. Must equal PROTOCOL_VERSION.
    pub version: u8,

    /// Reserved, must be zero.
    pub flags: u8,
}

assert_eq_size!(HandshakeHello, [u8; 4]);

impl HandshakeHello {
    /// The preamble this build sends.
    pub fn current() -> Self {
        Self {
            magic: HANDSHAKE_MAGIC,
            version: PROTOCOL_VERSION,
            flags: 0,
        }
    }

    /// Parse and validate a received preamble.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let hello = Self::read_from(bytes).ok_or(WireError::BadLength(bytes.len()))?;
        if hello.magic != HANDSHAKE_MAGIC {
            return Err(WireError::BadMagic(hello.magic));
        }
        if hello.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(hello.version));
        }
        if hello.flags != 0 {
            return Err(WireError::ReservedFlagsSet(hello.flags));
        }
        Ok(hello)
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Magic bytes opening a handshake preamble.
pub const HANDSHAKE_MAGIC: [u8; 2] = *b"GG";

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Default upper bound on a control payload accepted by a decoder.
pub const DEFAULT_MAX_CONTROL_LEN: u32 = 1024 * 1024;

/// Consecutive malformed frames tolerated before a connection is dropped.
pub const DEFAULT_MAX_DECODE_FAILURES: u32 = 8;

/// Default version handshake timeout in seconds.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame type byte: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("payload length {0} does not fit a u32 length prefix")]
    PayloadTooLarge(usize),

    #[error("handshake preamble must be 4 bytes, got {0}")]
    BadLength(usize),

    #[error("bad handshake magic: {}", hex::encode(.0))]
    BadMagic([u8; 2]),

    #[error("unsupported protocol version: 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
