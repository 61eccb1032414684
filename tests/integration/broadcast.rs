use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Broadcast Delivery
// ══════════════════════════════════════════════════════════════════════════════

/// In a fully connected triangle every other node sees A's message exactly
/// once, and A never sees its own message echoed back.
#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_delivered_exactly_once() -> Result<()> {
    let (mut a, mut b, mut c) = triangle().await?;

    let sent = a.say("hello mesh").await?;

    let at_b = b.drain(Duration::from_millis(500)).await;
    let at_c = c.drain(Duration::from_millis(500)).await;
    let at_a = a.drain(Duration::from_millis(100)).await;

    assert_eq!(at_b, vec![sent.clone()]);
    assert_eq!(at_c, vec![sent]);
    assert!(at_a.is_empty());
    Ok(())
}

/// Without a direct link, relay through the middle node still delivers.
#[tokio::test(flavor = "multi_thread")]
async fn test_message_relayed_across_chain() -> Result<()> {
    let a = start_node("a", VERSION).await?;
    let mut b = start_node("b", VERSION).await?;
    let mut c = start_node("c", VERSION).await?;

    b.join(&a).await?;
    b.join(&c).await?;
    wait_until(5, || a.knows(&b) && c.knows(&b)).await?;

    let sent = a.say("over the hill").await?;
    let at_c = within(5, c.inbound.recv()).await?.expect("c inbound open");
    assert_eq!(at_c, sent);
    let at_b = within(5, b.inbound.recv()).await?.expect("b inbound open");
    assert_eq!(at_b.id, sent.id);
    Ok(())
}

/// Messages from one sender arrive in the order they were sent.
#[tokio::test(flavor = "multi_thread")]
async fn test_per_sender_order_preserved() -> Result<()> {
    let a = start_node("a", VERSION).await?;
    let mut b = start_node("b", VERSION).await?;
    b.join(&a).await?;
    wait_until(5, || a.knows(&b)).await?;

    let mut sent = Vec::new();
    for i in 0..20 {
        sent.push(a.say(&format!("msg {i}")).await?.id);
    }

    let mut got = Vec::new();
    while got.len() < sent.len() {
        let msg = within(5, b.inbound.recv()).await?.expect("b inbound open");
        got.push(msg.id);
    }
    assert_eq!(got, sent);
    Ok(())
}
