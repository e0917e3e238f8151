//! TCP implementation of [`Transport`] and [`Peer`].
//!
//! Each connection is served by one task: handshake, `on_peer`, then a
//! decode loop that pushes frames onto the transport's shared channel. The
//! read half moves between three owners over a connection's life: the peer
//! itself (while hooks run), the decode loop, and the consumer of a stream
//! body (until it calls `finish`).

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use ggnet_core::wire::DEFAULT_MAX_DECODE_FAILURES;
use ggnet_core::{GgnetConfig, HandshakeMode};

use crate::connection::{ConnectionState, FailureVerdict};
use crate::decoder::{Decoder, Frame, LengthPrefixedDecoder};
use crate::error::{ConnectionError, DecodeError, TransportError};
use crate::handshake::{nop_handshake, version_handshake};
use crate::stream::{FrameReader, StreamBody, StreamGate};
use crate::transport::{
    rpc_channel, HandshakeFn, OnPeerFn, Payload, Peer, Rpc, RpcReceiver, Transport,
};

/// Pause after an accept error that would otherwise repeat immediately.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ── Peer ──────────────────────────────────────────────────────────────────────

pub struct TcpPeer {
    remote: SocketAddr,
    outbound: bool,
    writer: Mutex<OwnedWriteHalf>,
    /// Parked read half; empty while the decode loop or a stream body has it.
    reader: Mutex<Option<FrameReader>>,
    closed: watch::Sender<bool>,
}

impl TcpPeer {
    fn new(stream: TcpStream, remote: SocketAddr, outbound: bool) -> Self {
        let (read, write) = stream.into_split();
        Self {
            remote,
            outbound,
            writer: Mutex::new(write),
            reader: Mutex::new(Some(Box::new(BufReader::new(read)))),
            closed: watch::Sender::new(false),
        }
    }

    async fn take_reader(&self) -> Option<FrameReader> {
        self.reader.lock().await.take()
    }

    /// Resolves once `close` has been called.
    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        signalled(&mut rx).await;
    }
}

#[async_trait]
impl Peer for TcpPeer {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_outbound(&self) -> bool {
        self.outbound
    }

    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.lock().await.as_mut() {
            Some(reader) => reader.read(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "connection is being decoded by the transport",
            )),
        }
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        match self.writer.lock().await.shutdown().await {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl std::fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeer")
            .field("remote", &self.remote)
            .field("outbound", &self.outbound)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TcpTransportOpts {
    /// `host:port`, bound verbatim. Port 0 picks a free port.
    pub listen_addr: String,
    pub handshake: HandshakeFn,
    pub decoder: Arc<dyn Decoder>,
    pub on_peer: Option<OnPeerFn>,
    pub max_decode_failures: u32,
}

impl TcpTransportOpts {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            handshake: nop_handshake(),
            decoder: Arc::new(LengthPrefixedDecoder::default()),
            on_peer: None,
            max_decode_failures: DEFAULT_MAX_DECODE_FAILURES,
        }
    }

    pub fn from_config(config: &GgnetConfig) -> Self {
        let t = &config.transport;
        let handshake = match t.handshake {
            HandshakeMode::Nop => nop_handshake(),
            HandshakeMode::Version => {
                version_handshake(Duration::from_secs(t.handshake_timeout_secs))
            }
        };
        Self {
            listen_addr: config.network.listen_addr.clone(),
            handshake,
            decoder: Arc::new(LengthPrefixedDecoder::new(t.max_control_len)),
            on_peer: None,
            max_decode_failures: t.max_decode_failures,
        }
    }

    pub fn with_on_peer(mut self, on_peer: OnPeerFn) -> Self {
        self.on_peer = Some(on_peer);
        self
    }
}

#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    opts: TcpTransportOpts,
    /// Kept for the transport's whole life, so consumers only see the
    /// channel end after the transport and every connection task are gone.
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: RpcReceiver,
    local_addr: OnceLock<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Self {
        let (rpc_tx, rpc_rx) = rpc_channel();
        Self {
            inner: Arc::new(Inner {
                opts,
                rpc_tx,
                rpc_rx,
                local_addr: OnceLock::new(),
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn listen_addr(&self) -> &str {
        &self.inner.opts.listen_addr
    }

    async fn listen_and_accept(&self) -> Result<(), TransportError> {
        if let Some(addr) = self.local_addr() {
            return Err(TransportError::AlreadyListening(addr));
        }
        let addr = &self.inner.opts.listen_addr;
        let bind_err = |source| TransportError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(addr.as_str()).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        self.inner
            .local_addr
            .set(local)
            .map_err(TransportError::AlreadyListening)?;

        info!(addr = %local, "listening");
        let shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(accept_loop(self.inner.clone(), listener, shutdown));
        Ok(())
    }

    async fn dial(&self, addr: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        debug!(addr, "dialed");
        tokio::spawn(handle_conn(self.inner.clone(), stream, true));
        Ok(())
    }

    fn consume(&self) -> RpcReceiver {
        self.inner.rpc_rx.clone()
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.shutdown.send_replace(true);
        Ok(())
    }
}

async fn signalled(rx: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which also ends the wait.
    let _ = rx.wait_for(|set| *set).await;
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = signalled(&mut shutdown) => {
                info!(addr = ?inner.local_addr.get(), "stopped accepting");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "accepted connection");
                    tokio::spawn(handle_conn(inner.clone(), stream, false));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    if let Some(pause) = accept_backoff(&e) {
                        tokio::time::sleep(pause).await;
                    }
                }
            },
        }
    }
}

/// Errors about one half-open connection are retried at once; anything else,
/// such as running out of file descriptors, pauses the loop.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

async fn handle_conn(inner: Arc<Inner>, stream: TcpStream, outbound: bool) {
    let remote = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, "connection has no peer address");
            return;
        }
    };
    let peer = Arc::new(TcpPeer::new(stream, remote, outbound));

    match serve(&inner, &peer).await {
        Ok(()) => debug!(peer = %remote, "connection closed"),
        Err(e) => warn!(peer = %remote, error = %e, "dropping peer"),
    }
    if let Err(e) = peer.close().await {
        debug!(peer = %remote, error = %e, "shutdown failed");
    }
}

async fn serve(inner: &Inner, peer: &Arc<TcpPeer>) -> Result<(), ConnectionError> {
    let remote = peer.remote;
    let as_dyn: Arc<dyn Peer> = peer.clone();

    (inner.opts.handshake)(as_dyn.clone())
        .await
        .map_err(ConnectionError::Handshake)?;
    if let Some(on_peer) = &inner.opts.on_peer {
        on_peer(as_dyn).await.map_err(ConnectionError::Rejected)?;
    }
    info!(peer = %remote, outbound = peer.outbound, "peer connected");

    let mut reader = peer
        .take_reader()
        .await
        .ok_or(ConnectionError::ReaderMissing)?;
    let mut state = ConnectionState::new(inner.opts.max_decode_failures);

    loop {
        let decoded = tokio::select! {
            _ = peer.wait_closed() => return Ok(()),
            decoded = inner.opts.decoder.decode(reader.as_mut()) => decoded,
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(DecodeError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = %remote, "peer hung up");
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(ConnectionError::Decode(e)),
            Err(e) => {
                warn!(peer = %remote, error = %e, "malformed frame");
                if state.decode_failed()? == FailureVerdict::Drop {
                    return Err(ConnectionError::TooManyDecodeFailures(
                        state.consecutive_failures(),
                    ));
                }
                continue;
            }
        };

        match frame {
            Frame::Control(bytes) => {
                state.control_delivered()?;
                debug!(peer = %remote, len = bytes.len(), "control frame");
                deliver(inner, remote, Payload::Control(bytes)).await?;
                state.control_accepted()?;
            }
            Frame::Stream => {
                state.stream_delivered()?;
                debug!(peer = %remote, "stream frame");
                let (ack, wait) = StreamGate::open();
                let body = StreamBody::new(remote, reader, ack);
                deliver(inner, remote, Payload::Stream(body)).await?;
                reader = wait.wait().await?;
                state.stream_acked()?;
                debug!(peer = %remote, "stream finished");
            }
        }
    }
}

async fn deliver(inner: &Inner, from: SocketAddr, payload: Payload) -> Result<(), ConnectionError> {
    inner
        .rpc_tx
        .send(Rpc { from, payload })
        .await
        .map_err(|_| ConnectionError::ChannelClosed)
}
