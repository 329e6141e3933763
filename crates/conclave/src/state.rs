//! Application state and shared resources.
//!
//! All mutable node state (identity, readiness registry, proof value,
//! live links) sits behind one exclusive lock. Callers only get atomic
//! operations that take the lock, copy what they need, and release it
//! before any network I/O or key generation happens.

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use conclave_common::{ChainUpdate, ConclaveError, ConsensusResponse, NodeIdentity, PeerAddress};

use crate::cluster::{LinkId, LinkTable, PeerRegistry};
use crate::config::AppConfig;
use crate::credential::{CredentialIssuer, ProofSource, derive_proof};

/// Everything guarded by the node lock
struct Shared {
    identity: NodeIdentity,
    registry: PeerRegistry,
    /// Fixed the first time it is set; later chain updates never touch it
    proof: Option<String>,
    links: LinkTable,
}

impl Shared {
    /// Evaluate quorum and pin the proof value on first observation
    fn observe_quorum(&mut self) -> bool {
        let reached = self.registry.quorum_reached();
        if reached && self.proof.is_none() {
            let proof = derive_proof(&self.identity.current_chain);
            tracing::info!(
                peers = self.registry.ready_peer_count(),
                chain = %self.identity.current_chain,
                proof = %proof,
                "🤝 Quorum reached, proof value fixed"
            );
            self.proof = Some(proof);
        }
        reached
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Our id as announced to peers
    self_id: Arc<str>,

    /// Proof source (quorum-gated or pre-seeded)
    proof_source: Arc<ProofSource>,

    /// Certificate issuer
    issuer: Arc<CredentialIssuer>,

    /// Node state behind the single lock
    shared: Arc<Mutex<Shared>>,

    /// Shutdown fan-out for background loops and link tasks
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// Build state from validated configuration and register ourselves as ready
    pub fn new(config: AppConfig) -> Result<Self, ConclaveError> {
        let threshold = config.threshold()?;
        let self_id = config.resolve_self_id();
        let proof_source = config.proof_source();

        let mut registry = PeerRegistry::new(&self_id, threshold);
        for peer in config.peer_addresses()? {
            registry.add_peer(peer);
        }

        let shared = Shared {
            identity: NodeIdentity::new(),
            registry,
            proof: proof_source.initial_proof(),
            links: LinkTable::new(),
        };

        let issuer = CredentialIssuer::new(&config.credential);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            self_id: Arc::from(self_id),
            proof_source: Arc::new(proof_source),
            issuer: Arc::new(issuer),
            shared: Arc::new(Mutex::new(shared)),
            shutdown,
        })
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    // === Registry ===

    /// Record a peer's readiness; returns whether quorum holds afterwards
    pub async fn announce_ready(&self, peer_id: &str) -> bool {
        let mut shared = self.shared.lock().await;
        if shared.registry.announce_ready(peer_id) {
            tracing::info!(
                peer = %peer_id,
                ready = shared.registry.ready_peer_count(),
                needed = shared.registry.threshold().peers_required(),
                "Peer tunnel ready"
            );
        }
        shared.observe_quorum()
    }

    /// Current quorum status
    pub async fn quorum_reached(&self) -> bool {
        self.shared.lock().await.observe_quorum()
    }

    /// Remember a peer address; returns true if it was new
    pub async fn add_peer(&self, address: PeerAddress) -> bool {
        let added = self.shared.lock().await.registry.add_peer(address.clone());
        if added {
            tracing::info!(peer = %address, "➕ Peer added");
        }
        added
    }

    /// Snapshot of known peer addresses
    pub async fn known_peers(&self) -> Vec<PeerAddress> {
        self.shared.lock().await.registry.known_peers()
    }

    /// Snapshot of the readiness set (self included)
    pub async fn ready_peers(&self) -> Vec<String> {
        self.shared.lock().await.registry.list_ready()
    }

    // === Identity ===

    #[cfg(test)]
    pub async fn current_chain(&self) -> String {
        self.shared.lock().await.identity.current_chain.clone()
    }

    #[cfg(test)]
    pub async fn identity(&self) -> NodeIdentity {
        self.shared.lock().await.identity.clone()
    }

    /// Stored proof value, if any
    #[cfg(test)]
    pub async fn proof(&self) -> Option<String> {
        self.shared.lock().await.proof.clone()
    }

    /// Fold a fingerprint into the chain and queue the new value on every
    /// live link. Returns the new chain and the number of links reached.
    pub async fn apply_fingerprint(&self, fingerprint: &str) -> (String, usize) {
        let mut shared = self.shared.lock().await;
        let chain = shared.identity.advance(fingerprint).to_string();

        let reached = if shared.links.is_empty() {
            0
        } else {
            match serde_json::to_string(&ChainUpdate::new(self.self_id.to_string(), chain.clone())) {
                Ok(payload) => shared.links.broadcast(&payload),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize chain update");
                    0
                }
            }
        };

        (chain, reached)
    }

    // === Consensus ===

    /// Identity plus gated credential.
    ///
    /// In quorum mode `proof_key_hash`, `cert` and `key` stay empty until
    /// quorum. Key generation runs on the blocking pool after the lock is
    /// released.
    pub async fn consensus(&self) -> ConsensusResponse {
        let (chain, proof) = {
            let mut shared = self.shared.lock().await;
            let reached = shared.observe_quorum();
            let proof = if reached || !self.proof_source.is_gated() {
                shared.proof.clone()
            } else {
                None
            };
            (shared.identity.current_chain.clone(), proof)
        };

        let Some(proof) = proof else {
            return ConsensusResponse {
                service_id: chain,
                ..Default::default()
            };
        };

        let issuer = self.issuer.clone();
        let (seed_chain, seed_proof) = (chain.clone(), proof.clone());
        let material = tokio::task::spawn_blocking(move || issuer.issue(&seed_chain, &seed_proof))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Credential task failed");
                Default::default()
            });

        ConsensusResponse {
            service_id: chain,
            proof_key_hash: proof,
            cert: material.certificate,
            key: material.private_key,
        }
    }

    // === Links ===

    /// Register a live link and get its broadcast queue
    pub async fn attach_link(
        &self,
        peer: Option<PeerAddress>,
    ) -> (LinkId, mpsc::Receiver<String>) {
        self.shared.lock().await.links.attach(peer)
    }

    pub async fn detach_link(&self, id: LinkId) {
        self.shared.lock().await.links.detach(id);
    }

    /// Is an outbound link to `peer` currently up?
    pub async fn has_link(&self, peer: &PeerAddress) -> bool {
        self.shared.lock().await.links.has_peer(peer)
    }

    pub async fn link_count(&self) -> usize {
        self.shared.lock().await.links.len()
    }

    // === Shutdown ===

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signal every background loop and link task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
