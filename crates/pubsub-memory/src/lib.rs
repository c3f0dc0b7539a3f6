//! In-memory cluster for testing pub/sub clients.
//!
//! Simulates a sharded pub/sub cluster inside one process: per-node subscriber
//! tables, cluster-wide `PUBLISH`, slot-owned shard channels with `MOVED`
//! redirection, and the `PUBSUB` introspection subcommands. Nodes can be made
//! unreachable to exercise failure paths.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod adaptor;
mod cluster;
mod connection;
mod node;
mod pool;

pub use adaptor::{MemoryAdaptorError, MemoryTopologyAdaptor};
pub use cluster::MemoryCluster;
pub use connection::MemoryConnection;
pub use pool::MemoryConnectionPool;
