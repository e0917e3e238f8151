//! ggnetd — ggnet file server daemon.
//!
//! Usage: `ggnetd [listen_addr] [bootstrap_node...]`

use std::sync::Arc;

use anyhow::Result;

use ggnet_core::GgnetConfig;
use ggnet_p2p::{TcpTransport, TcpTransportOpts};
use ggnet_store::{Store, StoreOpts};
use ggnetd::{FileServer, FileServerOpts, PeerMap};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GgnetConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = GgnetConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GgnetConfig::default()
    });

    let mut args = std::env::args().skip(1);
    if let Some(listen_addr) = args.next() {
        config.network.listen_addr = listen_addr;
    }
    let bootstrap: Vec<String> = args.collect();
    if !bootstrap.is_empty() {
        config.network.bootstrap_nodes = bootstrap;
    }
    tracing::info!(
        listen_addr = %config.network.listen_addr,
        bootstrap = ?config.network.bootstrap_nodes,
        handshake = ?config.transport.handshake,
        "ggnetd starting"
    );

    let store = Store::new(StoreOpts::from(&config.storage));
    tracing::info!(root = %store.root().display(), scheme = ?config.storage.path_scheme, "store ready");

    let peers = PeerMap::default();
    let transport = TcpTransport::new(
        TcpTransportOpts::from_config(&config).with_on_peer(FileServer::on_peer_hook(peers.clone())),
    );
    let server = FileServer::new(
        FileServerOpts {
            store,
            transport: Arc::new(transport),
            bootstrap_nodes: config.network.bootstrap_nodes.clone(),
        },
        peers,
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    server.start(shutdown_rx).await?;
    tracing::info!("ggnetd stopped");
    Ok(())
}
