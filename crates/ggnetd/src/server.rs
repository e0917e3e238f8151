//! FileServer: stores data locally and replicates it to connected peers.
//!
//! Replication is announce-then-stream: a `StoreFile` control frame tells the
//! receiver how many bytes the sender's next stream frame carries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use ggnet_core::wire::{encode_control, STREAM_MARKER};
use ggnet_p2p::{OnPeerFn, Payload, Peer, Rpc, StreamBody, Transport};
use ggnet_store::Store;

use crate::message::NodeMessage;

/// Copy buffer used when streaming a stored file to a peer.
const SEND_CHUNK: usize = 64 * 1024;

/// Connected peers by remote address.
pub type PeerMap = Arc<DashMap<SocketAddr, Arc<dyn Peer>>>;

pub struct FileServerOpts {
    pub store: Store,
    pub transport: Arc<dyn Transport>,
    pub bootstrap_nodes: Vec<String>,
}

/// A stream announced by a peer but not yet received.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingFile {
    key: String,
    size: u64,
}

pub struct FileServer {
    opts: FileServerOpts,
    peers: PeerMap,
    /// Held for a whole broadcast so frames to one peer never interleave.
    outbound: Mutex<()>,
}

impl FileServer {
    pub fn new(opts: FileServerOpts, peers: PeerMap) -> Self {
        Self {
            opts,
            peers,
            outbound: Mutex::new(()),
        }
    }

    /// Hook for the transport's `on_peer`: remembers every accepted peer.
    pub fn on_peer_hook(peers: PeerMap) -> OnPeerFn {
        Arc::new(move |peer: Arc<dyn Peer>| {
            let peers = peers.clone();
            async move {
                let addr = peer.remote_addr();
                info!(peer = %addr, outbound = peer.is_outbound(), "peer added");
                peers.insert(addr, peer);
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    pub fn store(&self) -> &Store {
        &self.opts.store
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    /// Listen, dial bootstrap nodes, then serve inbound messages until
    /// `shutdown` fires.
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let transport = &self.opts.transport;
        transport
            .listen_and_accept()
            .await
            .with_context(|| format!("failed to listen on {}", transport.listen_addr()))?;
        self.bootstrap().await;

        let rx = transport.consume();
        let mut pending = HashMap::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("file server stopping");
                    break;
                }
                rpc = rx.recv() => match rpc {
                    Some(rpc) => {
                        let from = rpc.from;
                        if let Err(e) = self.handle_rpc(rpc, &mut pending).await {
                            warn!(peer = %from, error = %format!("{e:#}"), "failed to handle message");
                        }
                    }
                    // The transport keeps a sender for as long as it exists.
                    None => break,
                },
            }
        }

        transport.close()?;
        Ok(())
    }

    async fn bootstrap(&self) {
        for addr in self.opts.bootstrap_nodes.iter().filter(|a| !a.is_empty()) {
            debug!(addr = %addr, "dialing bootstrap node");
            if let Err(e) = self.opts.transport.dial(addr).await {
                let e = anyhow::Error::from(e);
                warn!(addr = %addr, error = %format!("{e:#}"), "bootstrap dial failed");
            }
        }
    }

    async fn handle_rpc(
        &self,
        rpc: Rpc,
        pending: &mut HashMap<SocketAddr, PendingFile>,
    ) -> Result<()> {
        match rpc.payload {
            Payload::Control(bytes) => {
                let msg = NodeMessage::from_json(&bytes).context("malformed node message")?;
                match msg {
                    NodeMessage::StoreFile { key, size } => {
                        debug!(peer = %rpc.from, key = %key, size, "store announced");
                        pending.insert(rpc.from, PendingFile { key, size });
                    }
                }
                Ok(())
            }
            Payload::Stream(body) => match pending.remove(&rpc.from) {
                Some(file) => self.receive_file(body, file).await,
                None => {
                    warn!(peer = %rpc.from, "stream without announcement");
                    body.finish();
                    Ok(())
                }
            },
        }
    }

    async fn receive_file(&self, mut body: StreamBody, file: PendingFile) -> Result<()> {
        let from = body.from();
        let mut limited = (&mut body).take(file.size);
        let stored = self.opts.store.write(&file.key, &mut limited).await;
        if stored.is_err() {
            // The sender's connection resumes after exactly `size` bytes.
            tokio::io::copy(&mut limited, &mut tokio::io::sink())
                .await
                .with_context(|| format!("failed to drain stream for {}", file.key))?;
        }
        body.finish();

        let written = stored.with_context(|| format!("failed to store replica of {}", file.key))?;
        if written < file.size {
            warn!(peer = %from, key = %file.key, written, expected = file.size, "short stream");
        }
        info!(peer = %from, key = %file.key, bytes = written, "replica stored");
        Ok(())
    }

    /// Store `reader` under `key`, then replicate it to every connected peer.
    /// Returns the number of bytes stored locally.
    pub async fn store_data<R>(&self, key: &str, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let size = self.opts.store.write(key, reader).await?;

        let peers: Vec<Arc<dyn Peer>> = self.peers.iter().map(|e| e.value().clone()).collect();
        let _guard = self.outbound.lock().await;
        for peer in peers {
            let addr = peer.remote_addr();
            if peer.is_closed() {
                self.peers.remove(&addr);
                continue;
            }
            if let Err(e) = self.replicate(peer.as_ref(), key).await {
                warn!(peer = %addr, key, error = %format!("{e:#}"), "replication failed");
            }
        }
        Ok(size)
    }

    async fn replicate(&self, peer: &dyn Peer, key: &str) -> Result<()> {
        let (size, file) = self.opts.store.open(key).await?;
        let announce = NodeMessage::StoreFile {
            key: key.to_string(),
            size,
        };
        let frame = encode_control(&announce.to_json()?)?;

        // Once anything is on the wire the receiver expects the full body.
        if let Err(e) = send_file(peer, &frame, file, size, key).await {
            self.drop_peer(peer).await;
            return Err(e);
        }
        debug!(peer = %peer.remote_addr(), key, bytes = size, "replica sent");
        Ok(())
    }

    async fn drop_peer(&self, peer: &dyn Peer) {
        let addr = peer.remote_addr();
        if let Err(e) = peer.close().await {
            debug!(peer = %addr, error = %e, "close failed");
        }
        self.peers.remove(&addr);
        info!(peer = %addr, "peer dropped");
    }
}

/// Announcement, stream marker, then exactly `size` bytes of `file`.
async fn send_file<R>(
    peer: &dyn Peer,
    announce: &[u8],
    mut file: R,
    size: u64,
    key: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    peer.send(announce).await.context("failed to send announcement")?;
    peer.send(&STREAM_MARKER).await.context("failed to send stream marker")?;

    let mut buf = vec![0u8; SEND_CHUNK];
    let mut sent = 0u64;
    while sent < size {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            anyhow::bail!("{key} shrank to {sent} bytes while sending");
        }
        let n = n.min(usize::try_from(size - sent).unwrap_or(usize::MAX));
        peer.send(&buf[..n])
            .await
            .with_context(|| format!("failed to send {key} after {sent} bytes"))?;
        sent += n as u64;
    }
    Ok(())
}
