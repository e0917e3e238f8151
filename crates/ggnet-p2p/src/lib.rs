//! ggnet-p2p — peer transport with handshake-gated connections and
//! control/stream frame multiplexing.

pub mod connection;
pub mod decoder;
pub mod error;
pub mod handshake;
pub mod stream;
pub mod tcp;
pub mod transport;

pub use decoder::{Decoder, Frame, LengthPrefixedDecoder};
pub use error::{ConnectionError, DecodeError, TransportError};
pub use handshake::{nop_handshake, version_handshake, HandshakeError};
pub use stream::{StreamAbandoned, StreamBody};
pub use tcp::{TcpPeer, TcpTransport, TcpTransportOpts};
pub use transport::{HandshakeFn, HookFuture, OnPeerFn, Payload, Peer, Rpc, RpcReceiver, Transport};
