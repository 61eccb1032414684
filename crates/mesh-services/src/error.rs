//! Error taxonomy for the mesh protocol engine.
//!
//! Every variant is scoped to one connection except `Bind`, which is
//! fatal to the node at startup.

use mesh_core::{PeerId, WireError};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Malformed or out-of-order frame. The connection is closed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Version mismatch. The peer never enters the registry.
    #[error("peer {peer} speaks version {remote:?}, we speak {local:?}")]
    Unauthorized {
        peer: PeerId,
        local: String,
        remote: String,
    },

    /// Reset or EOF at any stage of a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Outbound connection could not be established in time.
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },

    /// A frame could not be queued for one peer during broadcast.
    #[error("send to {peer} failed: {reason}")]
    Send { peer: PeerId, reason: String },

    /// The handshake reached our own node.
    #[error("connected to self")]
    SelfConnection,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<WireError> for MeshError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(e) => MeshError::ConnectionFailed(e.to_string()),
            WireError::Truncated(_) => MeshError::ConnectionFailed(e.to_string()),
            WireError::Malformed(_) | WireError::FrameTooLong(_) | WireError::InvalidUtf8 => {
                MeshError::Protocol(e.to_string())
            }
        }
    }
}
