//! Chat message schema.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{PeerId, PeerIdentity};

/// A broadcast chat message.
///
/// Immutable once constructed. `id` is unique per message and is the key
/// receivers use to suppress duplicates arriving over different paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: PeerId,
    pub sender_name: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub payload: String,
}

impl ChatMessage {
    /// Create a message sent by `sender`, stamped with the current time.
    pub fn new(sender: &PeerIdentity, payload: impl Into<String>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            id: Uuid::new_v4(),
            sender_id: sender.id,
            sender_name: sender.name.clone(),
            timestamp,
            payload: payload.into(),
        }
    }
}
