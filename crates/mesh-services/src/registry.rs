//! Peer registry — the single serialization point for mesh topology.
//!
//! Holds one entry per admitted remote peer id together with the handle used
//! to send on that peer's connection. Shared by the accept path, every
//! outbound dial, every read loop, and the broadcast router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mesh_core::{ChatMessage, PeerId, PeerIdentity};

use crate::error::MeshError;

/// Process-unique serial of one TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Send side of one admitted connection.
///
/// Chat frames pushed here are written by the connection's writer task, in
/// order. The queue is bounded; a full queue means a slow receiver.
#[derive(Debug, Clone)]
pub struct PeerLink {
    conn: ConnectionId,
    dialer: PeerId,
    tx: mpsc::Sender<ChatMessage>,
    closed: CancellationToken,
}

/// Receive side of a [`PeerLink`], owned by the connection's tasks.
#[derive(Debug)]
pub struct LinkQueue {
    rx: mpsc::Receiver<ChatMessage>,
    closed: CancellationToken,
}

impl PeerLink {
    /// Create a link for a connection opened by `dialer`, and the queue its
    /// writer task drains.
    pub fn channel(conn: ConnectionId, dialer: PeerId, depth: usize) -> (Self, LinkQueue) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let closed = CancellationToken::new();
        (
            Self {
                conn,
                dialer,
                tx,
                closed: closed.clone(),
            },
            LinkQueue { rx, closed },
        )
    }

    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    /// Id of the peer that opened this connection.
    pub fn dialer(&self) -> PeerId {
        self.dialer
    }

    /// Tie-break between two connections to the same peer. Both ends see
    /// the same pair of dialers, so both keep the same connection: the one
    /// opened by the smaller peer id. Same dialer keeps the existing one.
    pub fn supersedes(&self, existing: &PeerLink) -> bool {
        self.dialer < existing.dialer
    }

    /// Ask the connection's tasks to close.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Queue a message without waiting. Never blocks on a slow peer.
    pub fn try_deliver(&self, peer: PeerId, msg: ChatMessage) -> Result<(), MeshError> {
        self.tx.try_send(msg).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "outbound queue full",
                mpsc::error::TrySendError::Closed(_) => "connection closed",
            };
            MeshError::Send {
                peer,
                reason: reason.to_string(),
            }
        })
    }
}

impl LinkQueue {
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ChatMessage, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Resolves once the link was superseded or closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Split into the message receiver and the close signal.
    pub fn into_parts(self) -> (mpsc::Receiver<ChatMessage>, CancellationToken) {
        (self.rx, self.closed)
    }
}

/// One admitted peer.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub identity: PeerIdentity,
    pub link: PeerLink,
}

/// Thread-safe registry of admitted peers, keyed on peer id.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<PeerId, RegistryEntry>>,
    live: AtomicUsize,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PeerId, RegistryEntry>> {
        // Every critical section leaves the map consistent, so a panic
        // elsewhere while holding the lock does not corrupt it.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a peer. Returns false, changing nothing, if the id is present.
    pub fn admit(&self, identity: PeerIdentity, link: PeerLink) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(&identity.id) {
            return false;
        }
        entries.insert(identity.id, RegistryEntry { identity, link });
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Resolve a second connection to an admitted peer.
    ///
    /// Under the lock: if the peer is absent, `link` is admitted; if `link`
    /// supersedes the current connection, it takes the entry and the old
    /// connection is told to close. Returns false, changing nothing, when
    /// the current connection is kept. The old connection's read loop then
    /// fails `remove_connection` and leaves the new entry alone.
    pub fn replace_connection(&self, identity: PeerIdentity, link: PeerLink) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(&identity.id) {
            None => {
                entries.insert(identity.id, RegistryEntry { identity, link });
                self.inner.live.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(entry) if link.supersedes(&entry.link) => {
                let old = std::mem::replace(&mut entry.link, link);
                entry.identity = identity;
                old.close();
                true
            }
            Some(_) => false,
        }
    }

    /// Remove a peer if present. Double removal is a no-op.
    pub fn remove(&self, id: &PeerId) -> bool {
        let mut entries = self.entries();
        if entries.remove(id).is_some() {
            self.inner.live.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Remove a peer only while its entry still belongs to `conn`.
    ///
    /// Read loops use this so a closing connection never evicts a newer
    /// connection admitted for the same peer id.
    pub fn remove_connection(&self, id: &PeerId, conn: ConnectionId) -> bool {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(entry) if entry.link.connection() == conn => {
                entries.remove(id);
                self.inner.live.fetch_sub(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Identities of all peers except `excluding`, sorted by listen address.
    pub fn snapshot(&self, excluding: Option<&PeerId>) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .entries()
            .values()
            .filter(|e| Some(&e.identity.id) != excluding)
            .map(|e| e.identity.clone())
            .collect();
        peers.sort_by(|a, b| a.listen_addr.cmp(&b.listen_addr));
        peers
    }

    /// Is any admitted peer listening on `addr`?
    pub fn contains(&self, addr: &str) -> bool {
        self.entries()
            .values()
            .any(|e| e.identity.listen_addr == addr)
    }

    pub fn contains_id(&self, id: &PeerId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<RegistryEntry> {
        self.entries().get(id).cloned()
    }

    /// Send handles for every peer except `excluding`. Safe to use after
    /// the lock is released.
    pub fn links(&self, excluding: Option<&PeerId>) -> Vec<(PeerId, PeerLink)> {
        self.entries()
            .iter()
            .filter(|(id, _)| Some(*id) != excluding)
            .map(|(id, e)| (*id, e.link.clone()))
            .collect()
    }

    /// Live peer count.
    pub fn len(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
