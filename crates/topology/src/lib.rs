//! Slot routing and cluster topology for the keyspace client.
//!
//! This crate provides:
//! - Node identity (`NodeId`)
//! - Hash slot computation with hash-tag extraction (`key_slot`, `hash_tag`)
//! - Slot ownership tables (`SlotMap`, `SlotRange`)
//! - The `Topology` read interface and a refreshing `TopologyManager`
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod adaptor;
pub mod error;
pub mod manager;
pub mod node_id;
pub mod slot;
pub mod slot_map;

pub use adaptor::{TopologyAdaptor, TopologyAdaptorError, TopologyAdaptorErrorKind};
pub use error::TopologyError;
pub use manager::{TopologyManager, TopologyManagerConfig};
pub use node_id::NodeId;
pub use slot::{SLOT_COUNT, Slot, hash_tag, key_slot};
pub use slot_map::{SlotMap, SlotRange};

/// Read access to the slot→node table of a cluster.
///
/// Implementations serve from a locally cached view; refreshing that view is
/// the job of whoever owns the implementation.
pub trait Topology: Send + Sync + 'static {
    /// Returns the node owning `slot`.
    ///
    /// # Errors
    /// Returns `TopologyError::Unavailable` if no slot map is loaded and
    /// `TopologyError::SlotUnassigned` if the slot has no owner.
    fn node_for_slot(&self, slot: Slot) -> Result<NodeId, TopologyError>;

    /// Returns every node in the current view, in a stable order.
    ///
    /// # Errors
    /// Returns `TopologyError::Unavailable` if no slot map is loaded.
    fn all_nodes(&self) -> Result<Vec<NodeId>, TopologyError>;

    /// Returns the node owning the slot of `name`.
    ///
    /// # Errors
    /// Same as [`Topology::node_for_slot`].
    fn node_for_name(&self, name: &str) -> Result<NodeId, TopologyError> {
        self.node_for_slot(key_slot(name))
    }
}

impl Topology for SlotMap {
    fn node_for_slot(&self, slot: Slot) -> Result<NodeId, TopologyError> {
        self.owner(slot)
            .cloned()
            .ok_or(TopologyError::SlotUnassigned(slot))
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>, TopologyError> {
        Ok(self.nodes().to_vec())
    }
}
