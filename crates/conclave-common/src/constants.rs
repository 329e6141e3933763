//! Shared constants for Conclave components.

/// Identity token used before the first fingerprint and for empty trees
pub const DEFAULT_CHAIN: &str = "default_chain";

/// Default number of nodes expected in the group (this node included)
pub const DEFAULT_EXPECTED_PEERS: u32 = 4;

/// Smallest group that can form a quorum
pub const MIN_EXPECTED_PEERS: u32 = 2;

/// Chain engine tick interval (seconds)
pub const CHAIN_TICK_INTERVAL_SECS: u64 = 5;

/// Push-announce gossip interval (seconds)
pub const ANNOUNCE_INTERVAL_SECS: u64 = 10;

/// Persistent-link reconnect interval (seconds)
pub const RECONNECT_INTERVAL_SECS: u64 = 15;

/// Connect + exchange timeout for a single outbound peer attempt (seconds)
pub const PEER_TIMEOUT_SECS: u64 = 5;

/// Chain updates buffered per persistent link before the link is dropped
pub const LINK_QUEUE_CAPACITY: usize = 64;

/// Longest a single frame write on a persistent link may take (seconds)
pub const LINK_WRITE_TIMEOUT_SECS: u64 = 10;

/// Socket path reserved for the host-side node
pub const HOST_SOCK_PATH: &str = "/var/run/conclave-host.sock";

/// Self id taken by the node listening on the host socket
pub const HOST_PEER_NAME: &str = "genesis";

/// Subject common name on issued certificates
pub const CERT_COMMON_NAME: &str = "Conclave";

/// Certificate validity (days)
pub const CERT_VALIDITY_DAYS: u32 = 365;

/// Prefix marking a same-host peer reachable over a local-domain socket
pub const UNIX_PEER_PREFIX: &str = "unix:";

/// HTTP route paths
pub mod routes {
    pub const TUNNEL_READY: &str = "/tunnel/ready";
    pub const READY: &str = "/ready";
    pub const CONSENSUS: &str = "/consensus";
    pub const PEERS: &str = "/peers";
    pub const ADD_PEER: &str = "/addPeer";
    pub const WS: &str = "/ws";
}

/// HTTP header names
pub mod headers {
    /// Caller's node id on readiness announcements and link handshakes
    pub const X_NODE_ID: &str = "x-node-id";
}
