//! ggnet integration test harness.
//!
//! Every test runs real TCP over loopback with ports picked by the OS, and
//! stores under a fresh directory in the system temp dir, so tests can run
//! in parallel.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ggnet_p2p::{TcpTransport, TcpTransportOpts};
use ggnet_store::{cas_path_transform, Store, StoreOpts};
use ggnetd::{FileServer, FileServerOpts, PeerMap};

mod replication;
mod transport;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh, not yet created directory under the system temp dir.
pub fn temp_root(label: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "ggnet-it-{label}-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn temp_store(label: &str) -> Store {
    Store::new(StoreOpts {
        root: temp_root(label),
        transform: cas_path_transform,
    })
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {what}")
}

/// One running file server on loopback.
pub struct Node {
    pub server: Arc<FileServer>,
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl Node {
    pub async fn spawn(label: &str, bootstrap: &[SocketAddr]) -> Result<Node> {
        let peers = PeerMap::default();
        let transport = TcpTransport::new(
            TcpTransportOpts::new("127.0.0.1:0").with_on_peer(FileServer::on_peer_hook(peers.clone())),
        );
        let server = Arc::new(FileServer::new(
            FileServerOpts {
                store: temp_store(label),
                transport: Arc::new(transport.clone()),
                bootstrap_nodes: bootstrap.iter().map(|a| a.to_string()).collect(),
            },
            peers,
        ));

        let (shutdown, rx) = broadcast::channel(1);
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.start(rx).await })
        };

        eventually("listener", Duration::from_secs(5), || {
            let bound = transport.local_addr().is_some();
            async move { bound }
        })
        .await?;
        let addr = transport.local_addr().expect("listener bound");

        Ok(Node {
            server,
            addr,
            shutdown,
            task,
        })
    }

    /// Stop the server and remove its store.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await??;
        self.server.store().clear().await?;
        Ok(())
    }
}
