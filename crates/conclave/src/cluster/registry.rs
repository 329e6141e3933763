//! Peer registry.
//!
//! Tracks the peers we gossip with and the ids that have announced
//! readiness. Readiness only ever grows: there is no eviction, so a peer
//! that goes away stays counted. The registry detects group formation, not
//! ongoing liveness.

use std::collections::BTreeSet;

use conclave_common::{PeerAddress, QuorumThreshold};

/// Known peers + readiness set for one node
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    /// Our own id (always in `ready`, never counted toward quorum)
    self_id: String,
    /// Group size, this node included
    threshold: QuorumThreshold,
    /// Ids that announced readiness
    ready: BTreeSet<String>,
    /// Addresses the outbound gossip loop contacts
    known: BTreeSet<PeerAddress>,
}

impl PeerRegistry {
    /// Create a registry with ourselves already registered
    pub fn new(self_id: &str, threshold: QuorumThreshold) -> Self {
        let mut registry = Self {
            self_id: String::new(),
            threshold,
            ready: BTreeSet::new(),
            known: BTreeSet::new(),
        };
        registry.register_self(self_id);
        registry
    }

    /// Record our own id in the readiness set. Idempotent.
    pub fn register_self(&mut self, id: &str) {
        self.self_id = id.to_string();
        self.ready.insert(id.to_string());
    }

    /// Record a peer's readiness. Returns true if the id was new.
    pub fn announce_ready(&mut self, peer_id: &str) -> bool {
        self.ready.insert(peer_id.to_string())
    }

    /// Remember a peer address. Returns true if it was new.
    pub fn add_peer(&mut self, address: PeerAddress) -> bool {
        self.known.insert(address)
    }

    /// Distinct ready peers, not counting ourselves
    pub fn ready_peer_count(&self) -> usize {
        self.ready.iter().filter(|id| **id != self.self_id).count()
    }

    /// Have `threshold - 1` distinct peers besides us announced?
    pub fn quorum_reached(&self) -> bool {
        self.ready_peer_count() >= self.threshold.peers_required()
    }

    /// Snapshot of the readiness set (self included), sorted
    pub fn list_ready(&self) -> Vec<String> {
        self.ready.iter().cloned().collect()
    }

    /// Snapshot of known peer addresses, sorted
    pub fn known_peers(&self) -> Vec<PeerAddress> {
        self.known.iter().cloned().collect()
    }

    pub fn threshold(&self) -> QuorumThreshold {
        self.threshold
    }
}
