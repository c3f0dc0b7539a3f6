//! Publishing with cluster routing

use crate::error::{Error, PubSubResult};
use crate::runner::NodeCommandRunner;

use std::sync::Arc;

use bytes::Bytes;
use keyspace_topology::Topology;
use keyspace_transport::{Command, ConnectionPool};
use tracing::trace;

/// Routes `PUBLISH` to any node and `SPUBLISH` to the shard channel's owner.
pub struct Publisher<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    topology: Arc<T>,
    runner: NodeCommandRunner<P>,
}

impl<T, P> Clone for Publisher<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            runner: self.runner.clone(),
        }
    }
}

impl<T, P> Publisher<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    /// Create a publisher
    pub const fn new(topology: Arc<T>, runner: NodeCommandRunner<P>) -> Self {
        Self { topology, runner }
    }

    /// Publish to a classic channel; returns the receiver count the node reports
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no nodes are known, or the
    /// runner's error if the request fails.
    pub async fn publish(&self, channel: &str, message: impl Into<Bytes>) -> PubSubResult<i64> {
        let node = self
            .topology
            .all_nodes()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TopologyUnavailable("no nodes in topology".to_string()))?;

        trace!("Publishing to {} via {}", channel, node);

        self.runner
            .run(
                &node,
                Command::Publish {
                    channel: channel.to_string(),
                    message: message.into(),
                },
            )
            .await?
            .into_integer()
            .map_err(|e| Error::UnexpectedReply(e.to_string()))
    }

    /// Publish to a shard channel on the node owning its slot
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if the slot has no known owner, or
    /// the runner's error if the request fails.
    pub async fn spublish(&self, channel: &str, message: impl Into<Bytes>) -> PubSubResult<i64> {
        let node = self.topology.node_for_name(channel)?;

        trace!("Publishing to shard channel {} via {}", channel, node);

        self.runner
            .run(
                &node,
                Command::SPublish {
                    channel: channel.to_string(),
                    message: message.into(),
                },
            )
            .await?
            .into_integer()
            .map_err(|e| Error::UnexpectedReply(e.to_string()))
    }
}
