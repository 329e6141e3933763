//! Chain engine.
//!
//! Periodically fingerprints the base directory and folds the result into
//! the node's hash-chained identity.

mod engine;
mod fingerprint;

pub use engine::ChainEngine;
pub use fingerprint::fingerprint;
