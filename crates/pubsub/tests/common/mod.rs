//! Common setup for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keyspace_pubsub::{
    Callbacks, ClusterPubSub, PubSubConfig, PubSubResult, Session, SessionHandle, SessionOutcome,
    SessionState,
};
use keyspace_pubsub_memory::{MemoryCluster, MemoryConnectionPool};
use keyspace_topology::{NodeId, SlotMap};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound on any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

pub type Client = ClusterPubSub<SlotMap, MemoryConnectionPool>;

/// An in-memory cluster with a client routed by its slot map
pub struct TestCluster {
    pub cluster: MemoryCluster,
    pub pool: Arc<MemoryConnectionPool>,
    pub client: Client,
}

impl TestCluster {
    pub fn new(node_count: u8) -> Self {
        Self::with_config(node_count, PubSubConfig::default())
    }

    pub fn with_config(node_count: u8, config: PubSubConfig) -> Self {
        let cluster = MemoryCluster::with_node_count(node_count);
        let pool = Arc::new(MemoryConnectionPool::new(cluster.clone()));
        let client = ClusterPubSub::with_config(Arc::new(cluster.slot_map()), pool.clone(), config);

        Self {
            cluster,
            pool,
            client,
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.cluster.nodes()
    }

    /// A session whose classic subscriptions land on `nodes()[index]`.
    ///
    /// Classic routing uses the first node of the topology, so the session
    /// gets a view listing the nodes starting at `index`.
    pub fn session_on(&self, index: usize, callbacks: Callbacks) -> Session<MemoryConnectionPool> {
        let mut nodes = self.nodes();
        nodes.rotate_left(index);

        Session::new(
            Arc::new(SlotMap::split_evenly(&nodes)),
            self.pool.clone(),
            callbacks,
            PubSubConfig::default(),
        )
    }
}

/// Run a session in its own task
pub fn spawn_join(
    session: Session<MemoryConnectionPool>,
) -> JoinHandle<PubSubResult<SessionOutcome>> {
    tokio::spawn(session.join())
}

/// Wait for a spawned session to end
pub async fn joined(
    handle: JoinHandle<PubSubResult<SessionOutcome>>,
) -> PubSubResult<SessionOutcome> {
    timeout(WAIT, handle)
        .await
        .expect("session did not finish in time")
        .expect("session task panicked")
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Poll an async `condition` until it holds
pub async fn wait_until_async<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never held");
}

pub async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    wait_until(|| handle.state() == state).await;
}
