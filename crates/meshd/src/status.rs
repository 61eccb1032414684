//! HTTP status endpoint — exposes node state as JSON.

use axum::{Router, Json, extract::State};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mesh_core::PeerIdentity;
use mesh_services::MeshNode;

#[derive(Clone)]
pub struct StatusState {
    pub node: MeshNode,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub id:         String,
    pub name:       String,
    pub listen_addr: String,
    pub version:    String,
    pub peers:      usize,
}

async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let me = state.node.identity();
    Json(StatusResponse {
        id:          me.id.to_string(),
        name:        me.name.clone(),
        listen_addr: me.listen_addr.clone(),
        version:     me.version.clone(),
        peers:       state.node.peer_count(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub id:          String,
    pub name:        String,
    pub listen_addr: String,
    pub version:     String,
}

impl From<PeerIdentity> for PeerInfo {
    fn from(p: PeerIdentity) -> Self {
        Self {
            id:          p.id.to_string(),
            name:        p.name,
            listen_addr: p.listen_addr,
            version:     p.version,
        }
    }
}

async fn handle_peers(State(state): State<StatusState>) -> Json<PeersResponse> {
    let peers = state.node.peers().into_iter().map(PeerInfo::from).collect();
    Json(PeersResponse { peers })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
    .route("/status", get(handle_status))
    .route("/peers",  get(handle_peers))
    .with_state(state)
}

pub async fn serve(state: StatusState, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
