//! Cluster coordination modules.
//!
//! Implements:
//! - Peer registry (known peers, readiness set, quorum)
//! - Persistent peer links (observer list for chain broadcasts)
//! - Outbound gossip (push-announce or persistent-broadcast)

pub(crate) mod gossip;
mod links;
mod registry;

pub use gossip::GossipService;
pub use links::{LinkId, LinkTable, drive_link};
pub use registry::PeerRegistry;
