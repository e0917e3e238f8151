use crate::*;

/// Deterministic test data that does not repeat on small periods.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn stored_data_reaches_bootstrap_node() -> Result<()> {
    let a = Node::spawn("repl-a", &[]).await?;
    let b = Node::spawn("repl-b", &[a.addr]).await?;

    eventually("peers", Duration::from_secs(5), || {
        let ready = !a.server.peers().is_empty() && !b.server.peers().is_empty();
        async move { ready }
    })
    .await?;

    let data = b"my big data file here.";
    let n = b.server.store_data("myprivatedata", &mut &data[..]).await?;
    assert_eq!(n, data.len() as u64);

    let store = a.server.store().clone();
    eventually("replica", Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.has("myprivatedata").await }
    })
    .await?;
    // The file can be visible before the copy completes.
    eventually("full replica", Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            matches!(store.read("myprivatedata").await, Ok(got) if &got[..] == data)
        }
    })
    .await?;

    b.stop().await?;
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn replication_fans_out_and_keeps_order() -> Result<()> {
    let a = Node::spawn("fan-a", &[]).await?;
    let c = Node::spawn("fan-c", &[]).await?;
    let b = Node::spawn("fan-b", &[a.addr, c.addr]).await?;

    eventually("peers", Duration::from_secs(5), || {
        let ready = b.server.peers().len() == 2;
        async move { ready }
    })
    .await?;

    let first = payload(300_000);
    let second = payload(17);
    b.server.store_data("first", &mut &first[..]).await?;
    b.server.store_data("second", &mut &second[..]).await?;

    for node in [&a, &c] {
        let store = node.server.store().clone();
        for (key, want) in [("first", &first), ("second", &second)] {
            let store = store.clone();
            eventually(key, Duration::from_secs(10), move || {
                let store = store.clone();
                async move { matches!(store.read(key).await, Ok(got) if got[..] == want[..]) }
            })
            .await?;
        }
    }

    b.stop().await?;
    a.stop().await?;
    c.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_bootstrap_node_is_not_fatal() -> Result<()> {
    let gone = {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        l.local_addr()?
    };
    let node = Node::spawn("lonely", &[gone]).await?;

    let n = node.server.store_data("local", &mut &b"still works"[..]).await?;
    assert_eq!(n, 11);
    assert!(node.server.store().has("local").await);

    node.stop().await
}
