//! Connection abstraction for talking to cluster nodes.
//!
//! This crate is transport-agnostic: it defines the logical commands, replies
//! and push frames exchanged with a node, and the `Connection` and
//! `ConnectionPool` traits concrete transports implement. Wire encoding is
//! the implementation's concern.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod command;
pub mod error;
pub mod push;
pub mod reply;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use keyspace_topology::NodeId;
use uuid::Uuid;

pub use command::{Command, PubSubQuery};
pub use error::TransportError;
pub use push::{PushFrame, PushKind};
pub use reply::Reply;

/// A single connection to one node.
///
/// `send` and `recv` may be called concurrently from different tasks: a
/// subscribed connection has one task reading push frames while another
/// writes subscription changes.
#[async_trait]
pub trait Connection: Debug + Send + Sync + 'static {
    /// Unique id of this connection
    fn id(&self) -> Uuid;

    /// The node this connection talks to
    fn node(&self) -> &NodeId;

    /// Write a command
    async fn send(&self, command: Command) -> Result<(), TransportError>;

    /// Read the next reply or push frame
    async fn recv(&self) -> Result<Reply, TransportError>;

    /// Send a command and read its single reply
    async fn request(&self, command: Command) -> Result<Reply, TransportError> {
        self.send(command).await?;
        self.recv().await
    }

    /// Close the connection; pending and future reads fail with `ConnectionClosed`
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the connection has been closed by either side
    fn is_closed(&self) -> bool;
}

/// Hands out connections to nodes.
///
/// Connections used for request/response commands are released back after
/// the reply is read. A connection that entered subscribed mode is closed
/// before it is released.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    /// Get a connection to `node`, opening one if none is idle
    async fn acquire(&self, node: &NodeId) -> Result<Arc<dyn Connection>, TransportError>;

    /// Return a connection to the pool
    async fn release(&self, connection: Arc<dyn Connection>);
}
