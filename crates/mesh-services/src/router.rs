//! Fan-out of chat messages to every admitted connection.
//!
//! Each send is a non-blocking push into that connection's bounded queue, so
//! one slow or dead peer never stalls delivery to the others. A failed push
//! is logged and counted; removing the peer is left to its read loop.
//!
//! Relay is flood: the first copy of a message received from one peer is
//! delivered locally and pushed to every other peer. In a mesh with cycles
//! the same message can still cross a link more than once; the seen-set
//! drops those copies so each message is delivered and relayed at most once
//! per node.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mesh_core::{ChatMessage, PeerId};

use crate::dedup::SeenMessages;
use crate::registry::PeerRegistry;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: PeerRegistry,
    inbound: mpsc::Sender<ChatMessage>,
    seen: Arc<SeenMessages>,
}

impl BroadcastRouter {
    pub fn new(
        registry: PeerRegistry,
        inbound: mpsc::Sender<ChatMessage>,
        seen_capacity: usize,
    ) -> Self {
        Self {
            registry,
            inbound,
            seen: Arc::new(SeenMessages::new(seen_capacity)),
        }
    }

    /// Push `msg` to every admitted connection except `origin`.
    pub fn broadcast(&self, msg: &ChatMessage, origin: Option<&PeerId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (peer, link) in self.registry.links(origin) {
            match link.try_deliver(peer, msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, msg_id = %msg.id, "broadcast send failed");
                }
            }
        }

        tracing::debug!(
            msg_id = %msg.id,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast"
        );
        report
    }

    /// Broadcast a locally produced message.
    pub fn publish(&self, msg: &ChatMessage) -> BroadcastReport {
        // Marked seen so echoes from the mesh are not shown back to us.
        self.seen.first_sighting(msg.id);
        self.broadcast(msg, None)
    }

    /// Handle a chat message read from `from`'s connection.
    ///
    /// Never waits: a terminal that stops draining loses messages instead
    /// of stalling every read loop. Returns false if the message was a
    /// duplicate and was dropped.
    pub fn route_inbound(&self, msg: ChatMessage, from: PeerId) -> bool {
        if !self.seen.first_sighting(msg.id) {
            tracing::trace!(msg_id = %msg.id, %from, "duplicate message dropped");
            return false;
        }

        self.broadcast(&msg, Some(&from));

        match self.inbound.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(msg_id = %msg.id, %from, "inbound queue full, message not delivered locally");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("inbound consumer gone, message not delivered locally");
            }
        }
        true
    }

    /// Serialized dispatcher for messages produced by the local terminal.
    pub async fn run_outbound(self, mut rx: mpsc::Receiver<ChatMessage>, shutdown: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(msg) => msg,
                    None => {
                        tracing::info!("outbound producer dropped, dispatcher exiting");
                        break;
                    }
                },
            };
            self.publish(&msg);
        }
    }
}
