//! A local member of the mesh.
//!
//! Owns the listener, the registry, the router and the discovery queue, and
//! wires them together:
//!
//!   accept → handshake → admit → share peers → active
//!   dial   → handshake → admit → receive peers → enqueue candidates → active
//!
//! Every task the node spawns stops when `shutdown` is called.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use mesh_core::config::MeshConfig;
use mesh_core::{ChatMessage, FrameCodec, PeerIdentity};

use crate::connection::{self, Connection, ConnectionState, LinkContext};
use crate::error::MeshError;
use crate::gossip::{self, GossipPropagator};
use crate::handshake;
use crate::registry::{PeerLink, PeerRegistry};
use crate::router::BroadcastRouter;

/// The chat-facing side of a node, handed to the terminal.
#[derive(Debug)]
pub struct ChatChannels {
    /// Messages from the mesh, each delivered once.
    pub inbound: mpsc::Receiver<ChatMessage>,
    /// Messages to broadcast to every peer.
    pub outbound: mpsc::Sender<ChatMessage>,
}

/// Result of a single successful `connect_one`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake passed and the peer is now active.
    Joined(PeerIdentity),
    /// A peer with that listen address is already admitted. Nothing dialed.
    AlreadyKnown,
    /// The address is our own. Nothing dialed.
    SelfAddress,
    /// The peer was admitted through another connection in the meantime.
    Duplicate(PeerIdentity),
    /// Another dial to the same address is still running.
    InProgress,
}

/// Marks an address as being dialed until dropped.
struct DialGuard<'a> {
    dialing: &'a Mutex<HashSet<String>>,
    addr: String,
}

impl<'a> DialGuard<'a> {
    fn claim(dialing: &'a Mutex<HashSet<String>>, addr: &str) -> Option<Self> {
        let mut set = dialing.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(addr.to_string()) {
            return None;
        }
        Some(Self {
            dialing,
            addr: addr.to_string(),
        })
    }
}

impl Drop for DialGuard<'_> {
    fn drop(&mut self) {
        self.dialing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.addr);
    }
}

#[derive(Debug, Clone)]
pub struct MeshNode {
    inner: Arc<NodeInner>,
}

#[derive(Debug)]
struct NodeInner {
    identity: PeerIdentity,
    local_addr: SocketAddr,
    registry: PeerRegistry,
    router: BroadcastRouter,
    gossip: GossipPropagator,
    dialing: Mutex<HashSet<String>>,
    dial_timeout: Duration,
    outbound_depth: usize,
    shutdown: CancellationToken,
}

impl MeshNode {
    /// Bind the listener and start accepting, discovering and dispatching.
    pub async fn start(config: &MeshConfig) -> Result<(Self, ChatChannels), MeshError> {
        let net = &config.network;

        let listener = TcpListener::bind(&net.listen_addr)
            .await
            .map_err(|source| MeshError::Bind {
                addr: net.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| MeshError::Bind {
            addr: net.listen_addr.clone(),
            source,
        })?;

        let advertised = match net.advertise_addr.trim() {
            "" => local_addr.to_string(),
            addr => addr.to_string(),
        };
        let identity = PeerIdentity::new(&config.node.name, advertised, &config.node.version);

        let registry = PeerRegistry::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(net.inbound_queue_depth.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(net.outbound_queue_depth.max(1));
        let router = BroadcastRouter::new(registry.clone(), inbound_tx, net.seen_capacity);
        let (gossip, discovery_rx) = GossipPropagator::new(net.discovery_queue_depth);
        let shutdown = CancellationToken::new();

        let node = MeshNode {
            inner: Arc::new(NodeInner {
                identity,
                local_addr,
                registry,
                router: router.clone(),
                gossip,
                dialing: Mutex::new(HashSet::new()),
                dial_timeout: config.dial_timeout(),
                outbound_depth: net.outbound_queue_depth,
                shutdown: shutdown.clone(),
            }),
        };

        tracing::info!(
            id = %node.inner.identity.short_id(),
            name = %node.inner.identity.name,
            addr = %node.inner.identity.listen_addr,
            version = %node.inner.identity.version,
            "mesh node listening"
        );

        {
            let node = node.clone();
            tokio::spawn(connection::accept_loop(
                listener,
                shutdown.clone(),
                move |stream, remote| {
                    let node = node.clone();
                    async move { node.handle_inbound(stream, remote).await }
                },
            ));
        }

        {
            let node = node.clone();
            tokio::spawn(gossip::discovery_loop(
                discovery_rx,
                net.discovery_concurrency,
                shutdown.clone(),
                move |addr| {
                    let node = node.clone();
                    async move {
                        match node.connect_one(&addr).await {
                            Ok(outcome) => tracing::debug!(%addr, ?outcome, "discovery dial"),
                            Err(e) => tracing::warn!(%addr, error = %e, "discovery dial failed"),
                        }
                    }
                },
            ));
        }

        tokio::spawn(router.run_outbound(outbound_rx, shutdown));

        let channels = ChatChannels {
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        Ok((node, channels))
    }

    /// Dial every address concurrently. One failure never affects the rest.
    pub async fn connect<I, S>(&self, addrs: I) -> Vec<(String, Result<ConnectOutcome, MeshError>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attempts = addrs.into_iter().map(|addr| {
            let addr = addr.into();
            async move {
                let result = self.connect_one(&addr).await;
                (addr, result)
            }
        });
        futures::future::join_all(attempts).await
    }

    /// Dial one address and run it through handshake, admission and gossip.
    pub async fn connect_one(&self, addr: &str) -> Result<ConnectOutcome, MeshError> {
        let inner = &self.inner;
        let addr = addr.trim();

        if self.is_own_address(addr) {
            return Ok(ConnectOutcome::SelfAddress);
        }
        if inner.registry.contains(addr) {
            tracing::debug!(%addr, "already connected, skipping dial");
            return Ok(ConnectOutcome::AlreadyKnown);
        }
        let Some(_dialing) = DialGuard::claim(&inner.dialing, addr) else {
            tracing::debug!(%addr, "dial already in flight");
            return Ok(ConnectOutcome::InProgress);
        };

        let mut conn = Connection::outbound(addr);
        let stream = connection::dial(addr, inner.dial_timeout)
            .await
            .map_err(|e| conn.fail(e))?;
        conn.advance(ConnectionState::Handshaking)
            .map_err(|e| conn.fail(e))?;

        let mut framed = Framed::new(stream, FrameCodec::new());
        let remote = handshake::exchange(&mut framed, &inner.identity)
            .await
            .map_err(|e| conn.fail(e))?;

        let (link, queue) = PeerLink::channel(conn.id(), inner.identity.id, inner.outbound_depth);
        if !self.admit(&remote, link) {
            tracing::debug!(%addr, peer = %remote.short_id(), "peer already admitted, dropping dial");
            conn.close();
            return Ok(ConnectOutcome::Duplicate(remote));
        }
        conn.advance(ConnectionState::Admitted)
            .map_err(|e| conn.fail(e))?;

        let list = match gossip::receive_peers(&mut framed).await {
            Ok(list) => list,
            Err(e) => {
                let superseded = !inner.registry.remove_connection(&remote.id, conn.id())
                    && inner.registry.contains_id(&remote.id);
                conn.close();
                if superseded {
                    // The peer kept the connection it dialed to us instead.
                    tracing::debug!(%addr, peer = %remote.short_id(), "dial superseded");
                    return Ok(ConnectOutcome::Duplicate(remote));
                }
                return Err(e);
            }
        };

        let candidates = gossip::select_candidates(list, &inner.registry, &inner.identity.listen_addr);
        if !candidates.is_empty() {
            let queued = inner.gossip.enqueue(candidates);
            tracing::debug!(peer = %remote.short_id(), queued, "queued gossiped addresses");
        }

        tokio::spawn(connection::run_active(
            conn,
            framed,
            remote.clone(),
            queue,
            self.link_context(),
        ));

        Ok(ConnectOutcome::Joined(remote))
    }

    async fn handle_inbound(&self, stream: TcpStream, remote_addr: SocketAddr) {
        let inner = &self.inner;
        let mut conn = Connection::inbound(remote_addr);
        let mut framed = Framed::new(stream, FrameCodec::new());

        let remote = match handshake::exchange(&mut framed, &inner.identity).await {
            Ok(remote) => remote,
            Err(e @ MeshError::Unauthorized { .. }) => {
                tracing::warn!(%remote_addr, error = %e, "rejected peer");
                conn.close();
                return;
            }
            Err(e) => {
                tracing::debug!(%remote_addr, error = %e, "handshake failed");
                conn.close();
                return;
            }
        };

        let (link, queue) = PeerLink::channel(conn.id(), remote.id, inner.outbound_depth);
        if !self.admit(&remote, link) {
            tracing::debug!(%remote_addr, peer = %remote.short_id(), "peer already admitted, dropping connection");
            conn.close();
            return;
        }
        if let Err(e) = conn.advance(ConnectionState::Admitted) {
            tracing::warn!(error = %e, "admission out of order");
            inner.registry.remove_connection(&remote.id, conn.id());
            return;
        }

        if let Err(e) = gossip::share_peers(&mut framed, &inner.registry, &remote.id).await {
            tracing::debug!(peer = %remote.short_id(), error = %e, "peer list send failed");
            inner.registry.remove_connection(&remote.id, conn.id());
            conn.close();
            return;
        }

        connection::run_active(conn, framed, remote, queue, self.link_context()).await;
    }

    /// Admit `remote` on `link`. A peer already admitted through another
    /// connection goes through the registry tie-break, so both ends of a
    /// simultaneous open keep the same connection.
    fn admit(&self, remote: &PeerIdentity, link: PeerLink) -> bool {
        let registry = &self.inner.registry;
        if registry.admit(remote.clone(), link.clone()) {
            return true;
        }
        let replaced = registry.replace_connection(remote.clone(), link);
        if replaced {
            tracing::debug!(peer = %remote.short_id(), "connection superseded by tie-break");
        }
        replaced
    }

    fn link_context(&self) -> LinkContext {
        LinkContext {
            registry: self.inner.registry.clone(),
            router: self.inner.router.clone(),
            shutdown: self.inner.shutdown.clone(),
        }
    }

    fn is_own_address(&self, addr: &str) -> bool {
        addr == self.inner.identity.listen_addr || addr == self.inner.local_addr.to_string()
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.inner.identity
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Admitted peers, ordered by listen address.
    pub fn peers(&self) -> Vec<PeerIdentity> {
        self.inner.registry.snapshot(None)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    /// Stop accepting, dialing and dispatching, and close every connection.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!(id = %self.inner.identity.short_id(), "mesh node shutting down");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
