//! Configuration management for the Conclave node.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use conclave_common::constants::{
    ANNOUNCE_INTERVAL_SECS, CERT_COMMON_NAME, CERT_VALIDITY_DAYS, CHAIN_TICK_INTERVAL_SECS,
    DEFAULT_EXPECTED_PEERS, HOST_PEER_NAME, HOST_SOCK_PATH, PEER_TIMEOUT_SECS,
    RECONNECT_INTERVAL_SECS,
};
use conclave_common::{ConclaveError, PeerAddress, QuorumThreshold};

use crate::credential::ProofSource;

/// How this node tells its peers it is alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GossipStrategy {
    /// Short-lived `POST /tunnel/ready` to every known peer each cycle
    #[default]
    PushAnnounce,
    /// Long-lived WebSocket link per peer, used to push chain updates
    PersistentBroadcast,
}

/// What the chain engine hashes on every tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Path strings of every non-directory entry, in traversal order
    #[default]
    Paths,
    /// Sorted tree digest over relative paths, sizes and file contents
    Content,
}

/// Where issued key pairs come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Fresh key from the OS RNG per request; the seed only labels the certificate
    #[default]
    Random,
    /// Ed25519 key derived from `H(chain + proof)`, identical on every node
    Seeded,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directory tree fingerprinted by the chain engine
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Group size, this node included
    #[serde(default = "default_expected_peers")]
    pub expected_peers: u32,

    /// Local-domain socket to listen on (required)
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Optional TCP port (0 disables)
    #[serde(default)]
    pub tcp_port: Option<u16>,

    /// Peers to gossip with (`host:port` or `unix:/path`)
    #[serde(default)]
    pub peers: Vec<String>,

    /// Explicit self id (derived from the socket path / HOSTNAME if not set)
    #[serde(default)]
    pub node_id: Option<String>,

    /// Pre-shared proof seed; disables the quorum gate on `/consensus`
    #[serde(default)]
    pub proof_seed: Option<String>,

    /// Chain engine configuration
    #[serde(default)]
    pub chain: ChainConfig,

    /// Gossip configuration
    #[serde(default)]
    pub gossip: GossipConfig,

    /// Credential configuration
    #[serde(default)]
    pub credential: CredentialConfig,
}

/// Chain engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Fingerprinting strategy
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

impl ChainConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Outbound gossip configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GossipConfig {
    #[serde(default)]
    pub strategy: GossipStrategy,

    /// Seconds between push-announce cycles
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Seconds between reconnect sweeps for persistent links
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// Connect + exchange budget for one peer attempt
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            strategy: GossipStrategy::default(),
            announce_interval_secs: default_announce_interval(),
            reconnect_interval_secs: default_reconnect_interval(),
            peer_timeout_secs: default_peer_timeout(),
        }
    }
}

impl GossipConfig {
    /// Cycle length for the configured strategy
    pub fn cycle_interval(&self) -> Duration {
        match self.strategy {
            GossipStrategy::PushAnnounce => Duration::from_secs(self.announce_interval_secs),
            GossipStrategy::PersistentBroadcast => {
                Duration::from_secs(self.reconnect_interval_secs)
            }
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

/// Certificate issuance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub key_mode: KeyMode,

    /// Subject common name
    #[serde(default = "default_common_name")]
    pub common_name: String,

    /// Certificate lifetime in days
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::default(),
            common_name: default_common_name(),
            validity_days: default_validity_days(),
        }
    }
}

// Default value functions
fn default_base_dir() -> PathBuf { PathBuf::from(".") }
fn default_expected_peers() -> u32 { DEFAULT_EXPECTED_PEERS }
fn default_tick_interval() -> u64 { CHAIN_TICK_INTERVAL_SECS }
fn default_announce_interval() -> u64 { ANNOUNCE_INTERVAL_SECS }
fn default_reconnect_interval() -> u64 { RECONNECT_INTERVAL_SECS }
fn default_peer_timeout() -> u64 { PEER_TIMEOUT_SECS }
fn default_common_name() -> String { CERT_COMMON_NAME.to_string() }
fn default_validity_days() -> u32 { CERT_VALIDITY_DAYS }

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI / environment overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_overrides(args);
        Ok(config)
    }

    /// Apply CLI / environment overrides on top of file values
    pub fn apply_overrides(&mut self, args: &super::Args) {
        if let Some(ref base_dir) = args.base_dir {
            self.base_dir = base_dir.clone();
        }
        if let Some(expected) = args.expected_peers {
            self.expected_peers = expected;
        }
        if let Some(ref socket_path) = args.socket_path {
            self.socket_path = Some(socket_path.clone());
        }
        if let Some(port) = args.tcp_port {
            self.tcp_port = Some(port);
        }
        if !args.peers.is_empty() {
            self.peers = args
                .peers
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(ref node_id) = args.node_id {
            self.node_id = Some(node_id.clone());
        }
        if let Some(ref seed) = args.proof_seed {
            self.proof_seed = Some(seed.clone());
        }
        if let Some(strategy) = args.gossip_strategy {
            self.gossip.strategy = strategy;
        }
        if let Some(mode) = args.fingerprint {
            self.chain.fingerprint = mode;
        }
    }

    /// Group size as a validated threshold
    pub fn threshold(&self) -> Result<QuorumThreshold, ConclaveError> {
        QuorumThreshold::new(self.expected_peers)
    }

    /// The local-domain socket path; its absence is fatal
    pub fn require_socket_path(&self) -> Result<&Path, ConclaveError> {
        self.socket_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ConclaveError::Config("CONCLAVE_SOCK_PATH must be set".to_string()))
    }

    /// TCP port if the TCP listener is enabled
    pub fn tcp_listen_port(&self) -> Option<u16> {
        self.tcp_port.filter(|port| *port > 0)
    }

    /// Parse the configured peer list
    pub fn peer_addresses(&self) -> Result<Vec<PeerAddress>, ConclaveError> {
        self.peers
            .iter()
            .map(|p| {
                p.parse::<PeerAddress>()
                    .map_err(|e| ConclaveError::Config(format!("bad peer entry: {}", e)))
            })
            .collect()
    }

    /// Where the proof value comes from
    pub fn proof_source(&self) -> ProofSource {
        match self.proof_seed.as_deref().filter(|s| !s.is_empty()) {
            Some(seed) => ProofSource::Seeded(seed.to_string()),
            None => ProofSource::Quorum,
        }
    }

    /// Resolve this node's self id.
    ///
    /// Explicit id, then `genesis` for the host socket, then `HOSTNAME`,
    /// then a random `node-xxxxxxxx`. Call once; the fallback is random.
    pub fn resolve_self_id(&self) -> String {
        if let Some(id) = self.node_id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        if self.socket_path.as_deref() == Some(Path::new(HOST_SOCK_PATH)) {
            return HOST_PEER_NAME.to_string();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(generate_node_id)
    }

    /// Check everything that must hold before the node starts
    pub fn validate(&self) -> Result<(), ConclaveError> {
        self.threshold()?;
        self.require_socket_path()?;
        self.peer_addresses()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            expected_peers: default_expected_peers(),
            socket_path: None,
            tcp_port: None,
            peers: Vec::new(),
            node_id: None,
            proof_seed: None,
            chain: ChainConfig::default(),
            gossip: GossipConfig::default(),
            credential: CredentialConfig::default(),
        }
    }
}
