//! Error types for the transport layer

use thiserror::Error;

/// Transport-level failures on a single connection or request
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// A connection to the node could not be established
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed locally or by the peer
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation did not complete in time
    #[error("operation timed out")]
    Timeout,

    /// A reply could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),
}
