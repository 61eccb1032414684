//! Mesh integration test harness.
//!
//! Every test runs real nodes in-process, listening on 127.0.0.1 with
//! OS-assigned ports, so tests never interfere with each other and need
//! no special environment:
//!
//!   cargo test --test integration
//!
//! Each test shuts down the nodes it starts.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use mesh_core::config::MeshConfig;
use mesh_core::ChatMessage;
use mesh_services::{ChatChannels, ConnectOutcome, MeshNode};

mod broadcast;
mod failures;
mod handshake;
mod mesh;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const VERSION: &str = "1.0";

/// A running node plus the terminal side of its chat channels.
pub struct TestNode {
    pub node: MeshNode,
    pub inbound: mpsc::Receiver<ChatMessage>,
    pub outbound: mpsc::Sender<ChatMessage>,
}

impl TestNode {
    pub fn addr(&self) -> String {
        self.node.local_addr().to_string()
    }

    /// Join the mesh through `other`, failing unless the peer was admitted.
    pub async fn join(&self, other: &TestNode) -> Result<()> {
        match self.node.connect_one(&other.addr()).await? {
            ConnectOutcome::Joined(_) => Ok(()),
            outcome => bail!("expected to join {}, got {outcome:?}", other.addr()),
        }
    }

    /// Type a line into this node's terminal.
    pub async fn say(&self, text: &str) -> Result<ChatMessage> {
        let msg = ChatMessage::new(self.node.identity(), text);
        self.outbound.send(msg.clone()).await?;
        Ok(msg)
    }

    /// Everything delivered to the terminal within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, self.inbound.recv()).await {
            out.push(msg);
        }
        out
    }

    pub fn knows(&self, other: &TestNode) -> bool {
        self.node.registry().contains_id(&other.node.identity().id)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.node.shutdown();
    }
}

pub fn test_config(name: &str, version: &str) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.node.name = name.to_string();
    config.node.version = version.to_string();
    config.network.listen_addr = "127.0.0.1:0".to_string();
    config.network.dial_timeout_ms = 2000;
    config
}

pub async fn start_node(name: &str, version: &str) -> Result<TestNode> {
    let (node, ChatChannels { inbound, outbound }) =
        MeshNode::start(&test_config(name, version)).await?;
    Ok(TestNode { node, inbound, outbound })
}

/// Poll `cond` every 20ms until it holds or `secs` elapse.
pub async fn wait_until<F>(secs: u64, mut cond: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        if cond() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {secs}s");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Await `fut`, failing if it takes longer than `secs`.
pub async fn within<T>(secs: u64, fut: impl Future<Output = T>) -> Result<T> {
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(v) => Ok(v),
        Err(_) => bail!("timed out after {secs}s"),
    }
}

/// Start three nodes and link them A–B, C–B; gossip closes the triangle.
pub async fn triangle() -> Result<(TestNode, TestNode, TestNode)> {
    let a = start_node("a", VERSION).await?;
    let b = start_node("b", VERSION).await?;
    let c = start_node("c", VERSION).await?;

    b.join(&a).await?;
    wait_until(5, || a.node.peer_count() == 1).await?;
    c.join(&b).await?;
    wait_until(5, || {
        a.node.peer_count() == 2 && b.node.peer_count() == 2 && c.node.peer_count() == 2
    })
    .await?;

    Ok((a, b, c))
}
