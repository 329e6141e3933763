//! # Conclave Common
//!
//! Shared types, traits, and utilities used across Conclave components.
//!
//! ## Modules
//! - `types` - Core data structures (NodeIdentity, PeerAddress, QuorumThreshold, wire bodies)
//! - `digest` - SHA-256 hex helpers used for chain folding and proof derivation
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod digest;
pub mod error;
pub mod types;

pub use error::ConclaveError;
pub use types::*;
