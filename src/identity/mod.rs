//! Ring identity of the local node.
//!
//! Every node of the data store owns one slot: a token plus the instance that holds it.
//! Slots live in a registry shared by the whole cluster (Cassandra/Scylla), partitioned
//! by app name. At boot the sidecar either finds its own slot again, takes over the slot
//! of a node that died, or allocates a brand-new token.
//!
//! Taking over is the delicate part: the cloud layer's membership (who is still running)
//! and the ring's gossip (who is still live) are both consulted, since either can be stale.

pub mod allocation;
pub mod gossip;
pub mod heartbeat;
mod network;
pub mod registry;
pub mod replacement;
pub mod resolver;
pub mod sleeper;
pub mod slot;
#[cfg(test)]
pub mod testing;

pub use network::get_first_network_address;
pub use replacement::{GossipSource, ReplacementPolicy, UnreachablePolicy};
pub use resolver::{IdentityResolver, ResolvedIdentity, SlotOrigin};
pub use slot::{LocalNode, Slot};
