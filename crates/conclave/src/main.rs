//! # Conclave - Sidecar Group Bootstrap Node
//!
//! Lets a fixed-size group of peer processes find each other, agree that
//! the whole group is alive, and then derive a shared identity and a
//! short-lived credential without a central coordinator.
//!
//! ## Architecture
//! ```text
//!  base dir ──► Chain Engine ──┐
//!                              ▼
//!  peers ◄── Gossip ◄──── AppState (one lock) ◄──── HTTP (unix + tcp)
//!                              │
//!                              └──► Credential Deriver (after quorum)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod chain;
mod cluster;
mod config;
mod credential;
mod listener;
mod routes;
mod state;

use chain::{ChainEngine, fingerprint};
use cluster::GossipService;
use config::{AppConfig, FingerprintMode, GossipStrategy};
use state::AppState;

/// Conclave - group bootstrap node
#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory tree to fingerprint (overrides config, default ".")
    base_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "config/conclave.toml")]
    config: String,

    /// Expected group size, this node included (>= 2)
    #[arg(long, env = "EXPECTED_PEER_COUNT")]
    expected_peers: Option<u32>,

    /// Local-domain socket to listen on
    #[arg(long, env = "CONCLAVE_SOCK_PATH")]
    socket_path: Option<PathBuf>,

    /// TCP port to listen on (0 disables)
    #[arg(long, env = "CONCLAVE_TCP_PORT")]
    tcp_port: Option<u16>,

    /// Comma-separated peers (host:port or unix:/path)
    #[arg(long, env = "CONCLAVE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Self id announced to peers
    #[arg(long, env = "CONCLAVE_NODE_ID")]
    node_id: Option<String>,

    /// Pre-shared proof seed (disables the quorum gate)
    #[arg(long, env = "CONCLAVE_PROOF_SEED")]
    proof_seed: Option<String>,

    /// Outbound gossip strategy
    #[arg(long, env = "CONCLAVE_GOSSIP_STRATEGY", value_enum)]
    gossip_strategy: Option<GossipStrategy>,

    /// Fingerprint strategy
    #[arg(long, value_enum)]
    fingerprint: Option<FingerprintMode>,

    /// Print one fingerprint of the base directory and exit
    #[arg(long, default_value = "false")]
    oneshot: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;

    if args.oneshot {
        let dir = config.base_dir.clone();
        let mode = config.chain.fingerprint;
        let id = tokio::task::spawn_blocking(move || fingerprint(&dir, mode))
            .await
            .context("Fingerprint task failed")?
            .with_context(|| format!("Failed to fingerprint {}", config.base_dir.display()))?;
        println!("{}", id);
        return Ok(());
    }

    info!("🔥 Starting Conclave node v{}", env!("CARGO_PKG_VERSION"));

    config.validate().context("Invalid configuration")?;
    let socket_path = config.require_socket_path()?.to_path_buf();

    let state = AppState::new(config.clone())?;
    info!(
        self_id = %state.self_id(),
        expected = config.expected_peers,
        strategy = ?config.gossip.strategy,
        base_dir = %config.base_dir.display(),
        "📋 Configuration loaded, self-registered"
    );

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    // Chain engine
    let engine = ChainEngine::new(state.clone(), config.base_dir.clone(), &config.chain);
    let engine_shutdown = state.subscribe_shutdown();
    tasks.spawn(async move {
        engine.run(engine_shutdown).await;
        Ok(())
    });

    // Outbound gossip (runs even with no peers; /addPeer can add them later)
    let gossip = GossipService::new(state.clone(), config.gossip.clone());
    let gossip_shutdown = state.subscribe_shutdown();
    tasks.spawn(async move { gossip.run(gossip_shutdown).await });

    // Inbound listeners
    let app = routes::create_router(state.clone());
    tasks.spawn(listener::serve_unix(
        app.clone(),
        socket_path,
        state.subscribe_shutdown(),
    ));
    if let Some(port) = config.tcp_listen_port() {
        tasks.spawn(listener::serve_tcp(app, port, state.subscribe_shutdown()));
    }

    // Supervise until Ctrl+C or an early task exit
    let mut failure = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("🛑 Shutdown signal received");
        }
        Some(joined) = tasks.join_next() => {
            failure = match joined {
                Ok(Ok(())) => Some(anyhow::anyhow!("Background task exited unexpectedly")),
                Ok(Err(e)) => Some(e),
                Err(e) => Some(anyhow::Error::new(e).context("Background task panicked")),
            };
        }
    }

    state.shutdown();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Task failed during shutdown"),
            Err(e) => error!(error = %e, "Task panicked during shutdown"),
        }
    }

    if let Some(e) = failure {
        error!(error = %e, "💥 Conclave node stopped");
        return Err(e);
    }

    info!("👋 Conclave shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
