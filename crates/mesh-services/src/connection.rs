//! Per-connection lifecycle: dialing, accepting, and the active read/write
//! loops of an admitted peer.
//!
//! A connection moves through
//! `Connecting → Handshaking → Admitted → Active → Closed`, and can close
//! from any state. Only `Active` connections exchange chat frames.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use mesh_core::{ChatMessage, Frame, FrameCodec, PeerId, PeerIdentity};

use crate::error::MeshError;
use crate::registry::{ConnectionId, LinkQueue, PeerRegistry};
use crate::router::BroadcastRouter;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Admitted,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Handshaking, Admitted)
                | (Admitted, Active)
                | (Connecting | Handshaking | Admitted | Active, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Admitted => "admitted",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We accepted it.
    Inbound,
    /// We dialed it.
    Outbound,
}

/// Bookkeeping for one TCP connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    direction: Direction,
    remote: String,
    state: ConnectionState,
    peer: Option<PeerId>,
}

impl Connection {
    /// An accepted socket. The transport already exists, so it starts in
    /// `Handshaking`.
    pub fn inbound(remote: SocketAddr) -> Self {
        Self {
            id: ConnectionId::next(),
            direction: Direction::Inbound,
            remote: remote.to_string(),
            state: ConnectionState::Handshaking,
            peer: None,
        }
    }

    /// A dial about to be attempted.
    pub fn outbound(addr: &str) -> Self {
        Self {
            id: ConnectionId::next(),
            direction: Direction::Outbound,
            remote: addr.to_string(),
            state: ConnectionState::Connecting,
            peer: None,
        }
    }

    pub fn advance(&mut self, next: ConnectionState) -> Result<(), MeshError> {
        if !self.state.can_transition_to(next) {
            return Err(MeshError::Protocol(format!(
                "connection {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        tracing::trace!(conn = %self.id, from = %self.state, to = %next, "connection state");
        self.state = next;
        Ok(())
    }

    /// Move to `Closed`. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::trace!(conn = %self.id, from = %self.state, "connection closed");
            self.state = ConnectionState::Closed;
        }
    }

    /// Close on a failure path and hand the error back to the caller.
    pub fn fail(&mut self, e: MeshError) -> MeshError {
        tracing::debug!(conn = %self.id, remote = %self.remote, state = %self.state, error = %e, "connection failed");
        self.close();
        e
    }

    pub fn set_peer(&mut self, peer: PeerId) {
        self.peer = Some(peer);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Open a TCP connection to `addr`, bounded by `timeout`.
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, MeshError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%addr, error = %e, "set_nodelay failed");
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(MeshError::Dial {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(MeshError::Dial {
            addr: addr.to_string(),
            reason: format!("timed out after {}ms", timeout.as_millis()),
        }),
    }
}

/// Accept connections until `shutdown` fires, running `handler` for each as
/// its own task.
pub async fn accept_loop<F, Fut>(listener: TcpListener, shutdown: CancellationToken, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("accept loop shutting down");
                return;
            }

            result = listener.accept() => {
                let (stream, remote) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                tracing::debug!(%remote, "accepted connection");
                tokio::spawn(handler(stream, remote));
            }
        }
    }
}

// ── Active phase ─────────────────────────────────────────────────────────────

/// Shared handles an active connection needs.
#[derive(Debug, Clone)]
pub struct LinkContext {
    pub registry: PeerRegistry,
    pub router: BroadcastRouter,
    pub shutdown: CancellationToken,
}

/// Drive an admitted connection until it closes.
///
/// Spawns the writer that drains the link queue onto the socket, then reads
/// frames on this task. Chat frames go to the router; anything else is a
/// protocol violation. The loop also ends when the link is superseded by
/// another connection to the same peer. On exit the peer is removed from
/// the registry, unless a newer connection has since replaced this one.
pub async fn run_active<T>(
    mut conn: Connection,
    framed: Framed<T, FrameCodec>,
    peer: PeerIdentity,
    queue: LinkQueue,
    ctx: LinkContext,
) -> Connection
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = conn.advance(ConnectionState::Active) {
        tracing::warn!(error = %e, "connection not ready for chat");
        ctx.registry.remove_connection(&peer.id, conn.id());
        conn.close();
        return conn;
    }
    conn.set_peer(peer.id);

    let (outbound, superseded) = queue.into_parts();
    let (sink, mut stream) = framed.split();
    let writer = tokio::spawn(write_loop(sink, outbound, peer.id));

    tracing::info!(
        conn = %conn.id(),
        peer = %peer.short_id(),
        name = %peer.name,
        addr = %peer.listen_addr,
        "peer active"
    );

    loop {
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = superseded.cancelled() => {
                tracing::debug!(conn = %conn.id(), peer = %peer.short_id(), "connection superseded");
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Frame::Chat(msg))) => {
                ctx.router.route_inbound(msg, peer.id);
            }
            Some(Ok(other)) => {
                let e = MeshError::Protocol(format!("unexpected {} frame", other.kind()));
                tracing::warn!(peer = %peer.short_id(), error = %e, "closing connection");
                break;
            }
            Some(Err(e)) => {
                let e = MeshError::from(e);
                tracing::debug!(peer = %peer.short_id(), error = %e, "read failed");
                break;
            }
            None => break,
        }
    }

    ctx.registry.remove_connection(&peer.id, conn.id());
    writer.abort();
    conn.close();

    tracing::info!(
        conn = %conn.id(),
        peer = %peer.short_id(),
        name = %peer.name,
        "peer disconnected"
    );
    conn
}

async fn write_loop<T>(
    mut sink: SplitSink<Framed<T, FrameCodec>, Frame>,
    mut outbound: mpsc::Receiver<ChatMessage>,
    peer: PeerId,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = sink.send(Frame::Chat(msg)).await {
            let e = MeshError::Send {
                peer,
                reason: MeshError::from(e).to_string(),
            };
            // The read side sees the same failure and does the cleanup.
            tracing::warn!(error = %e, "write failed");
            break;
        }
    }
}
