use crate::cluster::MemoryCluster;
use crate::connection::MemoryConnection;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use keyspace_topology::NodeId;
use keyspace_transport::{Connection, ConnectionPool, TransportError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection pool over a [`MemoryCluster`].
///
/// Released connections are reused when they are still open and hold no
/// subscriptions; a connection released in subscribed mode is closed.
#[derive(Debug)]
pub struct MemoryConnectionPool {
    cluster: MemoryCluster,
    idle: DashMap<NodeId, Vec<Arc<MemoryConnection>>>,
    checked_out: DashMap<Uuid, Arc<MemoryConnection>>,
    opened: AtomicUsize,
}

impl MemoryConnectionPool {
    /// Create a pool for `cluster`
    #[must_use]
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            idle: DashMap::new(),
            checked_out: DashMap::new(),
            opened: AtomicUsize::new(0),
        }
    }

    /// The cluster this pool connects to
    #[must_use]
    pub const fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Total connections opened so far
    #[must_use]
    pub fn opened_connections(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections currently handed out and not yet released
    #[must_use]
    pub fn checked_out_connections(&self) -> usize {
        self.checked_out.len()
    }

    /// Idle connections kept for `node`
    #[must_use]
    pub fn idle_connections(&self, node: &NodeId) -> usize {
        self.idle.get(node).map_or(0, |conns| conns.len())
    }

    fn take_idle(&self, node: &NodeId) -> Option<Arc<MemoryConnection>> {
        let mut conns = self.idle.get_mut(node)?;
        while let Some(conn) = conns.pop() {
            if !conn.is_closed() {
                return Some(conn);
            }
        }
        None
    }
}

#[async_trait]
impl ConnectionPool for MemoryConnectionPool {
    async fn acquire(&self, node: &NodeId) -> Result<Arc<dyn Connection>, TransportError> {
        let conn = if let Some(conn) = self.take_idle(node) {
            debug!("Reusing connection {} to {}", conn.id(), node);
            conn
        } else {
            let conn = Arc::new(self.cluster.connect(node)?);
            self.opened.fetch_add(1, Ordering::SeqCst);
            conn
        };

        self.checked_out.insert(conn.id(), conn.clone());
        Ok(conn)
    }

    async fn release(&self, connection: Arc<dyn Connection>) {
        let Some((_, conn)) = self.checked_out.remove(&connection.id()) else {
            warn!("Released connection {} was not acquired here", connection.id());
            return;
        };
        drop(connection);

        if conn.is_closed() {
            debug!("Discarding closed connection {}", conn.id());
            return;
        }

        if conn.has_subscriptions() {
            debug!("Closing subscribed connection {} on release", conn.id());
            let _ = conn.close().await;
            return;
        }

        let stale = conn.drain_pending();
        if !stale.is_empty() {
            debug!(
                "Dropped {} unread replies from connection {}",
                stale.len(),
                conn.id()
            );
        }

        self.idle.entry(conn.node().clone()).or_default().push(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use keyspace_transport::{Command, PubSubQuery, Reply};

    #[tokio::test]
    async fn test_reuses_released_connections() {
        let pool = MemoryConnectionPool::new(MemoryCluster::with_node_count(2));
        let node = NodeId::from_seed(1);

        let conn = pool.acquire(&node).await.unwrap();
        let id = conn.id();
        assert_eq!(pool.checked_out_connections(), 1);
        pool.release(conn).await;
        assert_eq!(pool.idle_connections(&node), 1);

        let conn = pool.acquire(&node).await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(pool.opened_connections(), 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_subscribed_connections_are_not_reused() {
        let pool = MemoryConnectionPool::new(MemoryCluster::with_node_count(1));
        let node = NodeId::from_seed(1);

        let conn = pool.acquire(&node).await.unwrap();
        conn.send(Command::Subscribe(vec!["a".into()])).await.unwrap();
        pool.release(conn).await;

        assert_eq!(pool.idle_connections(&node), 0);
        assert_eq!(pool.cluster().connection_count(&node), 0);
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let cluster = MemoryCluster::with_node_count(2);
        let pool = MemoryConnectionPool::new(cluster.clone());
        let node = NodeId::from_seed(2);

        let conn = pool.acquire(&node).await.unwrap();
        pool.release(conn).await;

        cluster.set_unreachable(&node, true);
        assert!(matches!(
            pool.acquire(&node).await,
            Err(TransportError::ConnectionFailed(_))
        ));

        cluster.set_unreachable(&node, false);
        let conn = pool.acquire(&node).await.unwrap();
        assert_eq!(
            conn.request(Command::PubSub(PubSubQuery::NumPat))
                .await
                .unwrap(),
            Reply::Integer(0)
        );
        assert_eq!(pool.opened_connections(), 2);
    }
}
