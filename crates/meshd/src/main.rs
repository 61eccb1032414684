//! meshd — peer-to-peer mesh chat daemon.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use mesh_core::config::MeshConfig;
use mesh_services::{ConnectOutcome, MeshNode};

mod status;
mod terminal;

#[derive(Parser, Debug)]
#[command(name = "meshd", version, about = "Peer-to-peer mesh chat node")]
struct Cli {
    /// Address to listen on (host:port)
    #[arg(long)]
    listen: Option<String>,

    /// Display name shown next to our messages
    #[arg(long)]
    name: Option<String>,

    /// Protocol version; peers must match it exactly
    #[arg(long = "protocol-version")]
    protocol_version: Option<String>,

    /// Peer to connect to at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Local HTTP status port (0 = disabled)
    #[arg(long = "api-port")]
    api_port: Option<u16>,
}

impl Cli {
    fn apply(self, config: &mut MeshConfig) {
        if let Some(listen) = self.listen {
            config.network.listen_addr = listen;
        }
        if let Some(name) = self.name {
            config.node.name = name;
        }
        if let Some(version) = self.protocol_version {
            config.node.version = version;
        }
        if !self.peers.is_empty() {
            config.network.bootstrap_peers = self.peers;
        }
        if let Some(port) = self.api_port {
            config.api.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });
    cli.apply(&mut config);

    let (node, chat) = MeshNode::start(&config)
        .await
        .context("failed to start mesh node")?;

    // ── Bootstrap ────────────────────────────────────────────────────────────
    for (addr, result) in node.connect(config.network.bootstrap_peers.clone()).await {
        match result {
            Ok(ConnectOutcome::Joined(peer)) => {
                tracing::info!(%addr, peer = %peer.short_id(), name = %peer.name, "joined mesh");
            }
            Ok(outcome) => tracing::debug!(%addr, ?outcome, "bootstrap peer skipped"),
            Err(e) => tracing::warn!(%addr, error = %e, "bootstrap peer unreachable"),
        }
    }

    // ── Shutdown signal ──────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // ── Status endpoint ──────────────────────────────────────────────────────
    let status_task = (config.api.port != 0).then(|| {
        let state = status::StatusState { node: node.clone() };
        let port = config.api.port;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, port, shutdown).await {
                tracing::error!(error = %e, "status endpoint failed");
            }
        })
    });

    terminal::run(node.identity().clone(), chat, shutdown.clone()).await;

    node.shutdown();
    if let Some(task) = status_task {
        task.await.ok();
    }
    tracing::info!("meshd stopped");
    Ok(())
}
