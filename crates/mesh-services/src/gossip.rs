//! Gossip-based peer-list propagation.
//!
//! The accepting side sends its known listen addresses right after admitting
//! a new peer. The dialing side reads that list before going active and
//! hands every unknown address to the discovery queue, which dials them as
//! independent tasks. Deduplication lives in the registry (`contains` before
//! dialing, `admit` after handshake); there is no visited set.

use std::future::Future;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use mesh_core::{Frame, FrameCodec, PeerAddressList, PeerId};

use crate::error::MeshError;
use crate::registry::PeerRegistry;

// ── Exchange ──────────────────────────────────────────────────────────────────

/// Responder side: send every known address except the new peer's own.
pub async fn share_peers<T>(
    framed: &mut Framed<T, FrameCodec>,
    registry: &PeerRegistry,
    new_peer: &PeerId,
) -> Result<PeerAddressList, MeshError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let list: PeerAddressList = registry
        .snapshot(Some(new_peer))
        .into_iter()
        .map(|p| p.listen_addr)
        .collect();
    framed.send(Frame::PeerList(list.clone())).await?;
    tracing::debug!(count = list.len(), "shared peer list");
    Ok(list)
}

/// Initiator side: read the responder's peer list.
pub async fn receive_peers<T>(framed: &mut Framed<T, FrameCodec>) -> Result<PeerAddressList, MeshError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(Frame::PeerList(list))) => Ok(list),
        Some(Ok(other)) => Err(MeshError::Protocol(format!(
            "expected peer_list frame, got {}",
            other.kind()
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(MeshError::ConnectionFailed(
            "stream closed before peer list".to_string(),
        )),
    }
}

/// Addresses from `list` worth dialing: not empty, not our own, not already
/// admitted, first occurrence only.
pub fn select_candidates(
    list: PeerAddressList,
    registry: &PeerRegistry,
    own_addr: &str,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for addr in list {
        let addr = addr.trim().to_string();
        if addr.is_empty() || addr == own_addr || out.contains(&addr) {
            continue;
        }
        if registry.contains(&addr) {
            continue;
        }
        out.push(addr);
    }
    out
}

// ── Discovery queue ───────────────────────────────────────────────────────────

/// Producer handle of the bounded discovery queue.
#[derive(Debug, Clone)]
pub struct GossipPropagator {
    queue: mpsc::Sender<String>,
}

impl GossipPropagator {
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<String>) {
        let (queue, rx) = mpsc::channel(depth.max(1));
        (Self { queue }, rx)
    }

    /// Queue addresses for dialing. Returns how many were accepted; the rest
    /// are dropped when the queue is full.
    pub fn enqueue(&self, addrs: impl IntoIterator<Item = String>) -> usize {
        let mut queued = 0;
        for addr in addrs {
            match self.queue.try_send(addr) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(addr)) => {
                    tracing::warn!(%addr, "discovery queue full, dropping address");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        queued
    }
}

/// Drain the discovery queue, running `dial` for each address as its own
/// task with at most `concurrency` in flight.
///
/// Runs until `shutdown` fires or every producer is dropped.
pub async fn discovery_loop<F, Fut>(
    mut rx: mpsc::Receiver<String>,
    concurrency: usize,
    shutdown: CancellationToken,
    dial: F,
) where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    loop {
        let addr = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(addr) => addr,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            p = permits.clone().acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        tracing::debug!(%addr, "dialing gossiped address");
        let attempt = dial(addr);
        tokio::spawn(async move {
            attempt.await;
            drop(permit);
        });
    }

    tracing::debug!("discovery loop stopped");
}
