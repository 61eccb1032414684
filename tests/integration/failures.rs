use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Disconnects & Dial Failures
// ══════════════════════════════════════════════════════════════════════════════

/// Shutting B down removes it from A, while A keeps C.
#[tokio::test(flavor = "multi_thread")]
async fn test_peer_shutdown_removes_only_that_peer() -> Result<()> {
    let (a, b, c) = triangle().await?;

    b.node.shutdown();
    wait_until(5, || !a.knows(&b)).await?;

    assert!(a.knows(&c));
    assert!(c.knows(&a));
    wait_until(5, || !c.knows(&b)).await?;
    Ok(())
}

/// Survivors keep chatting after a peer leaves.
#[tokio::test(flavor = "multi_thread")]
async fn test_chat_continues_after_disconnect() -> Result<()> {
    let (a, b, mut c) = triangle().await?;

    drop(b);
    wait_until(5, || a.node.peer_count() == 1 && c.node.peer_count() == 1).await?;

    let sent = a.say("still here").await?;
    let got = within(5, c.inbound.recv()).await?.expect("c inbound open");
    assert_eq!(got, sent);
    Ok(())
}

/// A refused address yields a dial error promptly.
#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_address_reports_dial_error() -> Result<()> {
    let a = start_node("a", VERSION).await?;

    let dead = {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        l.local_addr()?.to_string()
    };

    let result = within(5, a.node.connect_one(&dead)).await?;
    assert!(matches!(result, Err(mesh_services::MeshError::Dial { .. })));
    assert_eq!(a.node.peer_count(), 0);
    Ok(())
}

/// A non-routable address is bounded by the dial timeout, not the OS default.
#[tokio::test(flavor = "multi_thread")]
async fn test_dial_timeout_is_bounded() -> Result<()> {
    let a = start_node("a", VERSION).await?;

    // TEST-NET-1: packets go nowhere; connect either times out or fails fast.
    let result = within(5, a.node.connect_one("192.0.2.1:7400")).await?;
    assert!(matches!(result, Err(mesh_services::MeshError::Dial { .. })));
    Ok(())
}

/// One bad address in a batch does not stop the good ones.
#[tokio::test(flavor = "multi_thread")]
async fn test_connect_batch_isolates_failures() -> Result<()> {
    let a = start_node("a", VERSION).await?;
    let b = start_node("b", VERSION).await?;

    let dead = {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        l.local_addr()?.to_string()
    };

    let results = b.node.connect([dead.clone(), a.addr()]).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, dead);
    assert!(results[0].1.is_err());
    assert!(matches!(results[1].1, Ok(ConnectOutcome::Joined(_))));
    Ok(())
}
