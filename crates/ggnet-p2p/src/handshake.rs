//! Handshake hooks.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use zerocopy::AsBytes;

use ggnet_core::wire::HandshakeHello;
use ggnet_core::WireError;

use crate::transport::{HandshakeFn, Peer};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("no handshake from peer within {0:?}")]
    Timeout(Duration),
}

/// Accepts every peer.
pub fn nop_handshake() -> HandshakeFn {
    Arc::new(|_peer: Arc<dyn Peer>| async { Ok::<(), anyhow::Error>(()) }.boxed())
}

/// Exchange a [`HandshakeHello`] and reject peers speaking another protocol.
pub fn version_handshake(timeout: Duration) -> HandshakeFn {
    Arc::new(move |peer: Arc<dyn Peer>| {
        async move {
            let hello = tokio::time::timeout(timeout, exchange_hello(peer.as_ref()))
                .await
                .map_err(|_| HandshakeError::Timeout(timeout))??;
            tracing::debug!(peer = %peer.remote_addr(), version = hello.version, "handshake ok");
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    })
}

async fn exchange_hello(peer: &dyn Peer) -> Result<HandshakeHello, HandshakeError> {
    peer.send(HandshakeHello::current().as_bytes()).await?;
    let mut buf = [0u8; std::mem::size_of::<HandshakeHello>()];
    peer.read_exact(&mut buf).await?;
    Ok(HandshakeHello::parse(&buf)?)
}
