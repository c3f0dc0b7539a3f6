//! Error types for topology operations

use crate::Slot;

use thiserror::Error;

/// Topology-related errors
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyError {
    /// No slot map has been loaded yet
    #[error("topology unavailable: no slot map loaded")]
    Unavailable,

    /// The slot map is loaded but nothing owns the slot
    #[error("slot {0} is not assigned to any node")]
    SlotUnassigned(Slot),

    /// A slot range was malformed
    #[error("invalid slot range {start}..={end}")]
    InvalidRange {
        /// First slot of the range
        start: Slot,
        /// Last slot of the range
        end: Slot,
    },

    /// Topology adaptor error
    #[error("topology adaptor error: {0}")]
    Adaptor(String),
}
