use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Handshake & Authorization
// ══════════════════════════════════════════════════════════════════════════════

/// Different protocol versions: the dial is rejected and neither side admits
/// the other.
#[tokio::test(flavor = "multi_thread")]
async fn test_version_mismatch_is_rejected() -> Result<()> {
    let a = start_node("a", "1.0").await?;
    let b = start_node("b", "2.0").await?;

    let result = b.node.connect_one(&a.addr()).await;
    assert!(matches!(
        result,
        Err(mesh_services::MeshError::Unauthorized { .. })
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!a.knows(&b));
    assert!(!b.knows(&a));
    assert_eq!(a.node.peer_count(), 0);
    assert_eq!(b.node.peer_count(), 0);
    Ok(())
}

/// A rejected peer does not disturb existing links.
#[tokio::test(flavor = "multi_thread")]
async fn test_mismatch_leaves_existing_peers_alone() -> Result<()> {
    let a = start_node("a", "1.0").await?;
    let b = start_node("b", "1.0").await?;
    let odd = start_node("odd", "0.9").await?;

    b.join(&a).await?;
    wait_until(5, || a.knows(&b)).await?;

    assert!(odd.node.connect_one(&a.addr()).await.is_err());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(a.node.peer_count(), 1);
    assert!(a.knows(&b));
    Ok(())
}
