//! Error types for the pub/sub client

use keyspace_topology::{NodeId, TopologyError};
use keyspace_transport::TransportError;
use thiserror::Error;

/// Result type for pub/sub operations
pub type PubSubResult<T> = Result<T, Error>;

/// Errors that can occur in pub/sub operations
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// No usable slot map is loaded
    #[error("topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// A connection to a specific node could not be acquired
    #[error("node {node} unreachable: {reason}")]
    NodeUnreachable {
        /// The node that could not be reached
        node: NodeId,
        /// Why it could not be reached
        reason: String,
    },

    /// Transport-level failure on a single request
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// The session has already been closed or has finished
    #[error("session already closed")]
    AlreadyClosed,

    /// The node answered with an error reply
    #[error("server error: {0}")]
    Server(String),

    /// The node answered with a reply of the wrong shape
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The session saw no traffic for its idle timeout
    #[error("session idle timeout elapsed")]
    Timeout,
}

impl From<TopologyError> for Error {
    fn from(error: TopologyError) -> Self {
        Self::TopologyUnavailable(error.to_string())
    }
}
