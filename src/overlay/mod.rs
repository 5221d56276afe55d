//! # Overlay Peers
//!
//! A peer owns one zone of the space, a neighbor table, its share of the
//! facts and the sub-subscriptions placed on it. Peers are actors: each one
//! drains an inbox of envelopes and is only reachable through a
//! [`Transport`].
//!
//! | Module | Contents |
//! |--------|----------|
//! | `neighbor` | Neighbor table keyed by dimension and direction |
//! | `transport` | `Transport` trait and the in-process `LocalTransport` |
//! | `peer` | Peer state, run loop and local evaluation of operations |
//! | `membership` | Zone split and handover when a peer joins |

pub mod neighbor;
pub mod transport;
pub mod peer;
pub mod membership;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use neighbor::{NeighborEntry, NeighborTable};
pub use transport::{Inbound, LocalTransport, Transport};
pub use peer::{MetricsSnapshot, Peer, PeerMetrics, Topology};
pub use membership::JoinGrant;

/// Opaque peer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Origin of messages issued from outside the overlay.
    pub const CLIENT: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}
