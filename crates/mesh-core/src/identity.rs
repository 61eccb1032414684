//! Who a mesh member is and where it can be dialed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique identifier of a mesh member.
pub type PeerId = Uuid;

/// Protocol version a node speaks unless configured otherwise.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0";

/// Immutable description of a mesh member.
///
/// Created once for the local node at startup; remote identities arrive in
/// the handshake frame and are copied, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub name: String,
    /// Address other peers dial to reach this node (host:port).
    #[serde(rename = "listenAddr")]
    pub listen_addr: String,
    pub version: String,
}

impl PeerIdentity {
    /// Create a new identity with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        listen_addr: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            listen_addr: listen_addr.into(),
            version: version.into(),
        }
    }

    /// Authorization predicate: version strings must match exactly.
    pub fn is_compatible(&self, other: &PeerIdentity) -> bool {
        self.version == other.version
    }

    /// First 8 hex digits of the id, for log fields.
    pub fn short_id(&self) -> String {
        let mut s = self.id.simple().to_string();
        s.truncate(8);
        s
    }
}
