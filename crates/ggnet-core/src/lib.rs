//! ggnet-core — shared wire format, digests, and configuration.
//! All other ggnet crates depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use config::{GgnetConfig, HandshakeMode, PathScheme};
pub use wire::{FrameType, WireError};
