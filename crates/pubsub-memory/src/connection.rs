use crate::cluster::MemoryCluster;

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use keyspace_topology::NodeId;
use keyspace_transport::{Command, Connection, Reply, TransportError};
use tracing::debug;
use uuid::Uuid;

/// Client side of a connection to a [`MemoryCluster`] node.
///
/// Commands execute synchronously inside `send`; their replies and any push
/// frames are queued until read with `recv`.
pub struct MemoryConnection {
    id: Uuid,
    node: NodeId,
    cluster: MemoryCluster,
    inbound: flume::Receiver<Reply>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub(crate) const fn new(
        id: Uuid,
        node: NodeId,
        cluster: MemoryCluster,
        inbound: flume::Receiver<Reply>,
    ) -> Self {
        Self {
            id,
            node,
            cluster,
            inbound,
            closed: AtomicBool::new(false),
        }
    }

    /// Take every reply queued but not yet read
    pub(crate) fn drain_pending(&self) -> Vec<Reply> {
        self.inbound.drain().collect()
    }

    pub(crate) fn has_subscriptions(&self) -> bool {
        self.cluster.is_subscribed(&self.node, &self.id)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn send(&self, command: Command) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        self.cluster
            .execute(&self.node, &self.id, command)
            .inspect_err(|_| self.mark_closed())
    }

    async fn recv(&self) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        self.inbound.recv_async().await.map_err(|_| {
            debug!("Memory connection {} lost its node", self.id);
            self.mark_closed();
            TransportError::ConnectionClosed
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        self.cluster.disconnect(&self.node, &self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.inbound.is_disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use keyspace_transport::PubSubQuery;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_reply() {
        let cluster = MemoryCluster::with_node_count(2);
        let conn = cluster.connect(&NodeId::from_seed(1)).unwrap();

        let reply = conn
            .request(Command::PubSub(PubSubQuery::NumPat))
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));

        let reply = conn
            .request(Command::Publish {
                channel: "news".into(),
                message: Bytes::from("hi"),
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let cluster = MemoryCluster::with_node_count(1);
        let conn = std::sync::Arc::new(cluster.connect(&NodeId::from_seed(1)).unwrap());

        let reader = tokio::spawn({
            let conn = conn.clone();
            async move { conn.recv().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        conn.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(TransportError::ConnectionClosed));
        assert!(conn.is_closed());
        assert_eq!(
            conn.send(Command::Subscribe(vec!["a".into()])).await,
            Err(TransportError::ConnectionClosed)
        );
    }
}
