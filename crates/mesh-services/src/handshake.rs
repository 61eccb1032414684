//! Identity exchange and version check that gates registry admission.
//!
//! Both sides send their handshake frame first and then read exactly one
//! frame. Validation runs only after both identities have crossed the wire,
//! so a rejected peer still learns who rejected it.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use mesh_core::{Frame, FrameCodec, PeerIdentity};

use crate::error::MeshError;

/// Perform the two-way identity exchange and authorize the remote peer.
///
/// Admission is the caller's job and must happen only on `Ok`.
pub async fn exchange<T>(
    framed: &mut Framed<T, FrameCodec>,
    local: &PeerIdentity,
) -> Result<PeerIdentity, MeshError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(Frame::Handshake(local.clone())).await?;
    tracing::trace!(local = %local.short_id(), "sent handshake");

    let remote = match framed.next().await {
        Some(Ok(Frame::Handshake(remote))) => remote,
        Some(Ok(other)) => {
            return Err(MeshError::Protocol(format!(
                "expected handshake frame, got {}",
                other.kind()
            )))
        }
        Some(Err(e)) => return Err(e.into()),
        None => {
            return Err(MeshError::ConnectionFailed(
                "stream closed during handshake".to_string(),
            ))
        }
    };
    tracing::trace!(remote = %remote.short_id(), name = %remote.name, "received handshake");

    authorize(local, &remote)?;
    Ok(remote)
}

/// Authorization predicate applied to a received identity.
pub fn authorize(local: &PeerIdentity, remote: &PeerIdentity) -> Result<(), MeshError> {
    if remote.id == local.id {
        return Err(MeshError::SelfConnection);
    }
    if !local.is_compatible(remote) {
        return Err(MeshError::Unauthorized {
            peer: remote.id,
            local: local.version.clone(),
            remote: remote.version.clone(),
        });
    }
    Ok(())
}
