//! Transport-neutral peer and transport interfaces.
//!
//! Everything TCP-specific lives in `tcp.rs`; the orchestrator only ever
//! sees these traits.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::stream::StreamBody;

/// Capacity of the shared inbound channel. Producers block until the
/// consumer takes the previous message.
pub const RPC_CHANNEL_CAPACITY: usize = 1;

/// A decoded message tagged with its sender.
#[derive(Debug)]
pub struct Rpc {
    pub from: SocketAddr,
    pub payload: Payload,
}

#[derive(Debug)]
pub enum Payload {
    Control(Bytes),
    /// The sender's connection is paused until the body is finished.
    Stream(StreamBody),
}

/// One established connection.
#[async_trait]
pub trait Peer: Send + Sync {
    fn remote_addr(&self) -> SocketAddr;

    /// True when this side dialed the connection.
    fn is_outbound(&self) -> bool;

    /// Write all of `bytes` to the connection.
    async fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Read from the connection. Only available while the transport is not
    /// decoding frames on it, i.e. inside the handshake and `on_peer` hooks.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    async fn read_exact(&self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let rest = buf;
            buf = &mut rest[n..];
        }
        Ok(())
    }

    /// Shut the connection down. Calling it again is a no-op.
    async fn close(&self) -> io::Result<()>;

    fn is_closed(&self) -> bool;
}

pub type HookFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Runs once per new connection before any frame is decoded.
pub type HandshakeFn = Arc<dyn Fn(Arc<dyn Peer>) -> HookFuture + Send + Sync>;

/// Runs once after a successful handshake; an error rejects the peer.
pub type OnPeerFn = Arc<dyn Fn(Arc<dyn Peer>) -> HookFuture + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// The configured listen address.
    fn listen_addr(&self) -> &str;

    /// Bind and start accepting in the background.
    async fn listen_and_accept(&self) -> Result<(), TransportError>;

    /// Open an outbound connection and serve it in the background.
    async fn dial(&self, addr: &str) -> Result<(), TransportError>;

    /// The shared inbound channel.
    fn consume(&self) -> RpcReceiver;

    /// Stop accepting. Established connections keep running.
    fn close(&self) -> Result<(), TransportError>;
}

/// Receiving side of the shared inbound channel. Clones share one queue.
#[derive(Clone)]
pub struct RpcReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Rpc>>>,
}

impl RpcReceiver {
    /// Next message. `None` only after the transport and all of its
    /// connections have been dropped.
    pub async fn recv(&self) -> Option<Rpc> {
        self.rx.lock().await.recv().await
    }
}

pub(crate) fn rpc_channel() -> (mpsc::Sender<Rpc>, RpcReceiver) {
    let (tx, rx) = mpsc::channel(RPC_CHANNEL_CAPACITY);
    (
        tx,
        RpcReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
