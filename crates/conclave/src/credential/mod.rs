//! Credential deriver.
//!
//! Derives the proof-of-membership value once the group has formed and
//! issues short-lived self-signed certificate/key pairs from it.

mod issuer;
mod proof;

pub use issuer::CredentialIssuer;
pub use proof::{ProofSource, derive_proof};
