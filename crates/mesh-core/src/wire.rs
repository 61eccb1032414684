//! Mesh wire format — the three frame kinds exchanged between peers.
//!
//! Every frame is one JSON document terminated by `\n`. The codec is
//! streaming: a frame split across reads is buffered until its newline
//! arrives, and several frames in one read are yielded one at a time, so
//! frame boundaries and per-connection ordering always survive.
//!
//! Frame order on a connection:
//!   1. `Handshake` from both sides (exactly one each).
//!   2. `PeerList` from the accepting side (exactly one).
//!   3. `Chat`, repeatedly, in both directions.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::identity::PeerIdentity;
use crate::message::ChatMessage;

// ── Frames ───────────────────────────────────────────────────────────────────

/// Listen addresses shared during gossip. Order is preserved; may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddressList(pub Vec<String>);

impl PeerAddressList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for PeerAddressList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PeerAddressList {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One self-delimiting record on a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Frame {
    Handshake(PeerIdentity),
    PeerList(PeerAddressList),
    Chat(ChatMessage),
}

impl Frame {
    /// Frame kind name, for log fields and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Handshake(_) => "handshake",
            Frame::PeerList(_) => "peer_list",
            Frame::Chat(_) => "chat",
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum encoded frame length in bytes, excluding the newline.
pub const MAX_FRAME_LEN: usize = 65536;

/// Default bound on establishing an outbound TCP connection.
pub const DIAL_TIMEOUT_MS: u64 = 5000;

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Newline-delimited JSON codec for [`Frame`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        loop {
            match self.lines.decode(src)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return serde_json::from_str(&line).map(Some).map_err(WireError::Malformed),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let leftover = src.len();
                src.clear();
                Err(WireError::Truncated(leftover))
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let line = serde_json::to_string(&frame).map_err(WireError::Malformed)?;
        if line.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLong(MAX_FRAME_LEN));
        }
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds maximum length of {0} bytes")]
    FrameTooLong(usize),

    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),

    #[error("stream ended inside a frame ({0} bytes buffered)")]
    Truncated(usize),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => WireError::FrameTooLong(MAX_FRAME_LEN),
            // LinesCodec reports undecodable lines as InvalidData.
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                WireError::InvalidUtf8
            }
            LinesCodecError::Io(e) => WireError::Io(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
