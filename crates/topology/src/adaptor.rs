//! Source of slot maps for the topology manager.

use std::error::Error;
use std::fmt::{self, Debug};

use async_trait::async_trait;

use crate::slot_map::SlotMap;

/// Marker trait for `TopologyAdaptor` errors
pub trait TopologyAdaptorError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> TopologyAdaptorErrorKind;
}

/// The kind of topology adaptor error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TopologyAdaptorErrorKind {
    /// The source of the slot map could not be reached
    Unreachable,

    /// The source answered with something that is not a usable slot map
    Malformed,

    /// Other/unknown error
    Other,
}

impl fmt::Display for TopologyAdaptorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Fetches the current slot→node table from wherever the cluster publishes it.
#[async_trait]
pub trait TopologyAdaptor: Send + Sync + 'static {
    /// The error type for the adaptor.
    type Error: TopologyAdaptorError;

    /// Fetch a fresh slot map.
    async fn fetch_slot_map(&self) -> Result<SlotMap, Self::Error>;
}
