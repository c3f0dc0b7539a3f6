//! Single-node request execution

use crate::config::PubSubConfig;
use crate::error::{Error, PubSubResult};

use std::sync::Arc;

use keyspace_topology::NodeId;
use keyspace_transport::{Command, ConnectionPool, Reply, TransportError};
use tokio::time::timeout;
use tracing::{debug, trace};

/// Sends one request to one node and returns its reply.
///
/// No retries happen here; callers decide what a failed node means.
pub struct NodeCommandRunner<P>
where
    P: ConnectionPool,
{
    pool: Arc<P>,
    config: PubSubConfig,
}

impl<P> Clone for NodeCommandRunner<P>
where
    P: ConnectionPool,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
        }
    }
}

impl<P> NodeCommandRunner<P>
where
    P: ConnectionPool,
{
    /// Create a runner over `pool`
    pub const fn new(pool: Arc<P>, config: PubSubConfig) -> Self {
        Self { pool, config }
    }

    /// Run `command` on `node`.
    ///
    /// # Errors
    /// - `Error::NodeUnreachable` if no connection to the node can be acquired
    /// - `Error::Connection` if the round trip fails or times out
    /// - `Error::Server` if the node answers with an error reply
    pub async fn run(&self, node: &NodeId, command: Command) -> PubSubResult<Reply> {
        trace!("Running {} on {}", command, node);

        let conn = match timeout(self.config.connect_timeout(), self.pool.acquire(node)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(Error::NodeUnreachable {
                    node: node.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::NodeUnreachable {
                    node: node.clone(),
                    reason: TransportError::Timeout.to_string(),
                });
            }
        };

        let result = timeout(self.config.request_timeout(), conn.request(command)).await;

        let reply = match result {
            Ok(Ok(reply)) => {
                self.pool.release(conn).await;
                reply
            }
            Ok(Err(e)) => {
                debug!("Request to {} failed: {}", node, e);
                let _ = conn.close().await;
                self.pool.release(conn).await;
                return Err(e.into());
            }
            Err(_) => {
                debug!("Request to {} timed out", node);
                // A late reply would otherwise be read by the next user
                let _ = conn.close().await;
                self.pool.release(conn).await;
                return Err(TransportError::Timeout.into());
            }
        };

        match reply {
            Reply::Error(message) => Err(Error::Server(message)),
            reply => Ok(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use keyspace_pubsub_memory::{MemoryCluster, MemoryConnectionPool};
    use keyspace_topology::key_slot;
    use keyspace_transport::PubSubQuery;

    #[tokio::test]
    async fn test_run_releases_connection() {
        let pool = Arc::new(MemoryConnectionPool::new(MemoryCluster::with_node_count(2)));
        let runner = NodeCommandRunner::new(pool.clone(), PubSubConfig::default());
        let node = NodeId::from_seed(1);

        for _ in 0..3 {
            let reply = runner
                .run(&node, Command::PubSub(PubSubQuery::NumPat))
                .await
                .unwrap();
            assert_eq!(reply, Reply::Integer(0));
        }

        assert_eq!(pool.opened_connections(), 1);
        assert_eq!(pool.checked_out_connections(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_and_unreachable_node() {
        let cluster = MemoryCluster::with_node_count(2);
        let pool = Arc::new(MemoryConnectionPool::new(cluster.clone()));
        let runner = NodeCommandRunner::new(pool, PubSubConfig::default());

        let owner = cluster.slot_map().owner(key_slot("foo")).unwrap().clone();
        let other = cluster.nodes().into_iter().find(|n| *n != owner).unwrap();

        let result = runner
            .run(
                &other,
                Command::SPublish {
                    channel: "foo".into(),
                    message: Bytes::from("x"),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Server(e)) if e.starts_with("MOVED")));

        cluster.set_unreachable(&owner, true);
        let result = runner
            .run(&owner, Command::PubSub(PubSubQuery::NumPat))
            .await;
        assert!(matches!(result, Err(Error::NodeUnreachable { node, .. }) if node == owner));
    }
}
