//! mesh-services — the peer-mesh protocol engine.
//!
//! Handshake and admission, the shared peer registry, gossip discovery,
//! per-connection lifecycle and broadcast routing, behind the `MeshNode`
//! facade.

pub mod connection;
pub mod dedup;
pub mod error;
pub mod gossip;
pub mod handshake;
pub mod node;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionState, Direction};
pub use error::MeshError;
pub use gossip::GossipPropagator;
pub use node::{ChatChannels, ConnectOutcome, MeshNode};
pub use registry::{ConnectionId, LinkQueue, PeerLink, PeerRegistry, RegistryEntry};
pub use router::{BroadcastReport, BroadcastRouter};
