use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Discovery & Convergence
// ══════════════════════════════════════════════════════════════════════════════

/// A starts, B connects to A, C connects to B. Gossip must link C to A.
#[tokio::test(flavor = "multi_thread")]
async fn test_three_node_chain_converges() -> Result<()> {
    let (a, b, c) = triangle().await?;

    assert!(a.knows(&b) && a.knows(&c));
    assert!(b.knows(&a) && b.knows(&c));
    assert!(c.knows(&a) && c.knows(&b));

    let addrs: Vec<String> = a.node.peers().into_iter().map(|p| p.listen_addr).collect();
    let mut expected = vec![b.addr(), c.addr()];
    expected.sort();
    assert_eq!(addrs, expected);
    Ok(())
}

/// Both ends of a link hold the other's identity exactly as announced.
#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_exchanges_identities() -> Result<()> {
    let a = start_node("alice", VERSION).await?;
    let b = start_node("bob", VERSION).await?;

    b.join(&a).await?;
    wait_until(5, || a.knows(&b)).await?;

    let a_view = a.node.registry().get(&b.node.identity().id).expect("b admitted at a");
    let b_view = b.node.registry().get(&a.node.identity().id).expect("a admitted at b");
    assert_eq!(&a_view.identity, b.node.identity());
    assert_eq!(&b_view.identity, a.node.identity());
    Ok(())
}

/// Connecting to an address already in the registry dials nothing.
#[tokio::test(flavor = "multi_thread")]
async fn test_connect_to_known_address_is_noop() -> Result<()> {
    let a = start_node("a", VERSION).await?;
    let b = start_node("b", VERSION).await?;

    b.join(&a).await?;
    wait_until(5, || a.knows(&b)).await?;

    let results = b.node.connect([a.addr()]).await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Ok(ConnectOutcome::AlreadyKnown)));

    // No second connection reached A.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.node.peer_count(), 1);
    assert_eq!(b.node.peer_count(), 1);
    Ok(())
}

/// A larger chain still converges to a full mesh.
#[tokio::test(flavor = "multi_thread")]
async fn test_five_node_chain_converges() -> Result<()> {
    let mut nodes = Vec::new();
    for i in 0..5 {
        nodes.push(start_node(&format!("n{i}"), VERSION).await?);
    }
    for i in 1..nodes.len() {
        nodes[i].join(&nodes[i - 1]).await?;
    }

    wait_until(10, || nodes.iter().all(|n| n.node.peer_count() == 4)).await?;
    Ok(())
}

/// A dials B while B dials A. Both ends must settle on the same connection
/// and keep the link.
#[tokio::test(flavor = "multi_thread")]
async fn test_simultaneous_open_keeps_link() -> Result<()> {
    for round in 0..20 {
        let a = start_node("a", VERSION).await?;
        let b = start_node("b", VERSION).await?;
        let (a_addr, b_addr) = (a.addr(), b.addr());

        let (ab, ba) = tokio::join!(a.node.connect_one(&b_addr), b.node.connect_one(&a_addr));

        wait_until(5, || a.knows(&b) && b.knows(&a))
            .await
            .map_err(|e| anyhow::anyhow!("round {round}: link lost ({ab:?} / {ba:?}): {e}"))?;

        // Still linked once the losing connection has closed.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(a.knows(&b) && b.knows(&a), "round {round}: link dropped after settling");
        assert_eq!(a.node.peer_count(), 1);
        assert_eq!(b.node.peer_count(), 1);

        let a_conn = a.node.registry().get(&b.node.identity().id).expect("b at a").link.dialer();
        let b_conn = b.node.registry().get(&a.node.identity().id).expect("a at b").link.dialer();
        assert_eq!(a_conn, b_conn, "round {round}: ends kept different connections");
    }
    Ok(())
}

/// The surviving connection carries chat both ways.
#[tokio::test(flavor = "multi_thread")]
async fn test_simultaneous_open_link_carries_chat() -> Result<()> {
    let mut a = start_node("a", VERSION).await?;
    let mut b = start_node("b", VERSION).await?;
    let (a_addr, b_addr) = (a.addr(), b.addr());

    let _ = tokio::join!(a.node.connect_one(&b_addr), b.node.connect_one(&a_addr));
    wait_until(5, || a.knows(&b) && b.knows(&a)).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let from_a = a.say("ping").await?;
    assert_eq!(within(5, b.inbound.recv()).await?.expect("b inbound open"), from_a);
    let from_b = b.say("pong").await?;
    assert_eq!(within(5, a.inbound.recv()).await?.expect("a inbound open"), from_b);
    Ok(())
}
