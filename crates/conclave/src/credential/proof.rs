//! Proof value derivation.

use conclave_common::digest::sha256_hex;

/// `H(chain)`. Pure; the caller stores the first result and never recomputes it.
pub fn derive_proof(chain: &str) -> String {
    sha256_hex(chain)
}

/// Where the proof value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofSource {
    /// Derived from the chain the first time quorum is observed
    Quorum,
    /// Pre-shared seed; proof is `H(seed)` from startup and nothing is gated
    Seeded(String),
}

impl ProofSource {
    /// Proof value available before any quorum is observed
    pub fn initial_proof(&self) -> Option<String> {
        match self {
            Self::Quorum => None,
            Self::Seeded(seed) => Some(sha256_hex(seed)),
        }
    }

    /// Does `/consensus` wait for quorum before handing out credentials?
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::Quorum)
    }
}
