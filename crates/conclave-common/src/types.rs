//! Core types shared across Conclave components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{DEFAULT_CHAIN, MIN_EXPECTED_PEERS, UNIX_PEER_PREFIX};
use crate::digest::sha256_hex;
use crate::error::ConclaveError;

/// The node's evolving identity value.
///
/// Starts at [`DEFAULT_CHAIN`]. The first fingerprint replaces it outright;
/// every later fingerprint is folded in as `H(previous || fingerprint)`, so
/// each value depends on the whole history of ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Current hex chain value
    pub current_chain: String,
    /// Has at least one fingerprint been folded in?
    pub first_computed: bool,
}

impl NodeIdentity {
    pub fn new() -> Self {
        Self {
            current_chain: DEFAULT_CHAIN.to_string(),
            first_computed: false,
        }
    }

    /// Fold a fresh fingerprint into the chain and return the new value
    pub fn advance(&mut self, fingerprint: &str) -> &str {
        self.current_chain = if self.first_computed {
            sha256_hex(format!("{}{}", self.current_chain, fingerprint))
        } else {
            fingerprint.to_string()
        };
        self.first_computed = true;
        &self.current_chain
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of nodes (this one included) that make up a full group.
///
/// Fixed for the lifetime of a node. Quorum needs `value - 1` distinct
/// peers besides ourselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct QuorumThreshold(u32);

impl QuorumThreshold {
    /// Create a threshold, rejecting groups smaller than two
    pub fn new(value: u32) -> Result<Self, ConclaveError> {
        if value < MIN_EXPECTED_PEERS {
            return Err(ConclaveError::Config(format!(
                "expected peer count must be at least {}, got {}",
                MIN_EXPECTED_PEERS, value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Distinct peers (excluding self) needed for quorum
    pub fn peers_required(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl TryFrom<u32> for QuorumThreshold {
    type Error = ConclaveError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QuorumThreshold> for u32 {
    fn from(value: QuorumThreshold) -> Self {
        value.0
    }
}

/// Where a peer can be reached.
///
/// Written as `host:port` for TCP peers and `unix:/path/to.sock` for
/// same-host peers listening on a local-domain socket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeerAddress {
    Tcp { host: String, port: u16 },
    Local(PathBuf),
}

impl PeerAddress {
    /// TCP peer. IPv6 hosts are stored bare (`::1`), brackets are stripped.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(bare) => bare.to_string(),
            None => host,
        };
        Self::Tcp { host, port }
    }

    /// Host to put in the `Host` header of outbound requests
    pub fn authority(&self) -> String {
        match self {
            Self::Tcp { host, port } if host.contains(':') => format!("[{}]:{}", host, port),
            Self::Tcp { host, port } => format!("{}:{}", host, port),
            Self::Local(_) => "localhost".to_string(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { .. } => f.write_str(&self.authority()),
            Self::Local(path) => write!(f, "{}{}", UNIX_PEER_PREFIX, path.display()),
        }
    }
}

impl FromStr for PeerAddress {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix(UNIX_PEER_PREFIX) {
            if path.is_empty() {
                return Err(ConclaveError::InvalidInput(format!(
                    "empty socket path in peer '{}'",
                    s
                )));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ConclaveError::InvalidInput(format!("peer '{}' is not host:port", s))
        })?;
        if host.is_empty() || host == "[]" {
            return Err(ConclaveError::InvalidInput(format!(
                "peer '{}' has an empty host",
                s
            )));
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(ConclaveError::InvalidInput(format!(
                "IPv6 host in peer '{}' must be bracketed",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConclaveError::InvalidInput(format!("invalid port in peer '{}'", s)))?;

        Ok(Self::tcp(host, port))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = ConclaveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(value: PeerAddress) -> Self {
        value.to_string()
    }
}

/// Body of `POST /tunnel/ready`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelAck {
    pub tunnel: String,
}

impl TunnelAck {
    pub fn acknowledged() -> Self {
        Self {
            tunnel: "acknowledged".to_string(),
        }
    }
}

/// Body of `GET /ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStatus {
    pub ready: bool,
}

/// Body of `GET /consensus`.
///
/// `cert`, `key`, and (in quorum mode) `proof_key_hash` stay empty until
/// the group has formed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResponse {
    pub service_id: String,
    pub proof_key_hash: String,
    pub cert: String,
    pub key: String,
}

/// Body of `GET /peers`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<String>,
}

/// Chain value pushed over persistent peer links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainUpdate {
    /// Sending node
    pub node_id: String,
    /// Sender's chain value after its latest tick
    pub service_id: String,
    /// Unix timestamp
    pub timestamp: i64,
}

impl ChainUpdate {
    pub fn new(node_id: String, service_id: String) -> Self {
        Self {
            node_id,
            service_id,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_advance_replaces_default() {
        let mut identity = NodeIdentity::new();
        assert_eq!(identity.current_chain, DEFAULT_CHAIN);
        assert!(!identity.first_computed);

        identity.advance("abc123");
        assert_eq!(identity.current_chain, "abc123");
        assert!(identity.first_computed);
    }

    #[test]
    fn test_advance_is_hash_chained() {
        let mut identity = NodeIdentity::new();
        identity.advance("fp");
        let first = identity.current_chain.clone();

        identity.advance("fp");
        assert_eq!(identity.current_chain, sha256_hex(format!("{}fp", first)));
        assert_ne!(identity.current_chain, first);
    }

    #[test]
    fn test_threshold_minimum() {
        assert!(QuorumThreshold::new(1).is_err());
        assert!(QuorumThreshold::new(0).is_err());
        let t = QuorumThreshold::new(4).unwrap();
        assert_eq!(t.peers_required(), 3);
    }

    #[test]
    fn test_peer_address_parsing() {
        let tcp: PeerAddress = "10.0.0.2:7501".parse().unwrap();
        assert_eq!(tcp, PeerAddress::tcp("10.0.0.2", 7501));
        assert_eq!(tcp.to_string(), "10.0.0.2:7501");

        let local: PeerAddress = "unix:/var/run/peer.sock".parse().unwrap();
        assert_eq!(local, PeerAddress::Local(PathBuf::from("/var/run/peer.sock")));
        assert_eq!(local.to_string(), "unix:/var/run/peer.sock");

        let v6: PeerAddress = "[::1]:7501".parse().unwrap();
        assert_eq!(v6, PeerAddress::Tcp { host: "::1".to_string(), port: 7501 });
        assert_eq!(v6.to_string(), "[::1]:7501");
        assert_eq!(v6.authority(), "[::1]:7501");
        assert_eq!(PeerAddress::tcp("[fe80::2]", 80), PeerAddress::tcp("fe80::2", 80));
    }

    #[test]
    fn test_peer_address_rejects_garbage() {
        assert!("no-port".parse::<PeerAddress>().is_err());
        assert!(":7501".parse::<PeerAddress>().is_err());
        assert!("host:99999".parse::<PeerAddress>().is_err());
        assert!("unix:".parse::<PeerAddress>().is_err());
        assert!("::1:7501".parse::<PeerAddress>().is_err());
        assert!("[]:7501".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_consensus_escapes_quotes() {
        let body = ConsensusResponse {
            service_id: "sid".to_string(),
            cert: "a\"b".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""cert":"a\"b""#));
    }
}
