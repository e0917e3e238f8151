use crate::*;

use futures::FutureExt;
use ggnet_core::wire::{encode_control, STREAM_MARKER};
use ggnet_p2p::{version_handshake, OnPeerFn, Payload, Peer, Transport};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

async fn listening(opts: TcpTransportOpts) -> (TcpTransport, SocketAddr) {
    let transport = TcpTransport::new(opts);
    transport.listen_and_accept().await.unwrap();
    let addr = transport.local_addr().unwrap();
    (transport, addr)
}

fn loopback() -> TcpTransportOpts {
    TcpTransportOpts::new("127.0.0.1:0")
}

/// Collects peers handed to `on_peer`.
fn capture() -> (OnPeerFn, mpsc::UnboundedReceiver<Arc<dyn Peer>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hook: OnPeerFn = Arc::new(move |peer: Arc<dyn Peer>| {
        let tx = tx.clone();
        async move {
            tx.send(peer)
                .map_err(|_| anyhow::anyhow!("test dropped the receiver"))?;
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    });
    (hook, rx)
}

#[tokio::test]
async fn stream_body_lands_in_store() {
    let (receiver, addr) = listening(loopback()).await;
    let rx = receiver.consume();
    let store = temp_store("stream");

    let (hook, mut peers) = capture();
    let sender = TcpTransport::new(loopback().with_on_peer(hook));
    sender.dial(&addr.to_string()).await.unwrap();
    let peer = peers.recv().await.unwrap();

    let payload = vec![0x5a; 200_000];
    peer.send(&encode_control(b"meta").unwrap()).await.unwrap();
    peer.send(&STREAM_MARKER).await.unwrap();
    peer.send(&payload).await.unwrap();
    peer.send(&encode_control(b"done").unwrap()).await.unwrap();

    match rx.recv().await.unwrap().payload {
        Payload::Control(bytes) => assert_eq!(&bytes[..], b"meta"),
        Payload::Stream(_) => panic!("expected control"),
    }
    let mut body = match rx.recv().await.unwrap().payload {
        Payload::Stream(body) => body,
        Payload::Control(_) => panic!("expected stream"),
    };
    assert!(body.from().ip().is_loopback());

    let n = {
        let mut limited = (&mut body).take(payload.len() as u64);
        store.write("blob", &mut limited).await.unwrap()
    };
    assert_eq!(n, payload.len() as u64);
    body.finish();

    match rx.recv().await.unwrap().payload {
        Payload::Control(bytes) => assert_eq!(&bytes[..], b"done"),
        Payload::Stream(_) => panic!("expected control"),
    }
    assert_eq!(store.read("blob").await.unwrap().len(), payload.len());
    store.clear().await.unwrap();
}

#[tokio::test]
async fn messages_from_many_peers_share_one_channel() {
    let (receiver, addr) = listening(loopback()).await;
    let rx = receiver.consume();

    let mut senders = Vec::new();
    for _ in 0..3 {
        let (hook, mut peers) = capture();
        let sender = TcpTransport::new(loopback().with_on_peer(hook));
        sender.dial(&addr.to_string()).await.unwrap();
        let peer = peers.recv().await.unwrap();
        for i in 0..4u8 {
            peer.send(&encode_control(&[i]).unwrap()).await.unwrap();
        }
        senders.push((sender, peer));
    }

    // Per sender, frames arrive in the order they were written.
    let mut seen: std::collections::HashMap<SocketAddr, Vec<u8>> = Default::default();
    for _ in 0..12 {
        let rpc = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match rpc.payload {
            Payload::Control(bytes) => seen.entry(rpc.from).or_default().push(bytes[0]),
            Payload::Stream(_) => panic!("expected control"),
        }
    }
    assert_eq!(seen.len(), 3);
    for order in seen.values() {
        assert_eq!(order, &[0, 1, 2, 3]);
    }
}

#[tokio::test]
async fn version_handshake_refuses_handshakeless_dialer() {
    let mut opts = loopback();
    opts.handshake = version_handshake(Duration::from_millis(200));
    let (receiver, addr) = listening(opts).await;
    let rx = receiver.consume();

    // The dialer skips the handshake and goes straight to frames.
    let (hook, mut peers) = capture();
    let sender = TcpTransport::new(loopback().with_on_peer(hook));
    sender.dial(&addr.to_string()).await.unwrap();
    let peer = peers.recv().await.unwrap();
    peer.send(&encode_control(b"hi").unwrap()).await.unwrap();

    assert!(tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .is_err());
}
