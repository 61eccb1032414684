//! mesh-core — shared types, wire format, and configuration.
//! All other mesh crates depend on this one.

pub mod config;
pub mod identity;
pub mod message;
pub mod wire;

pub use identity::{PeerId, PeerIdentity, DEFAULT_PROTOCOL_VERSION};
pub use message::ChatMessage;
pub use wire::{Frame, FrameCodec, PeerAddressList, WireError};
