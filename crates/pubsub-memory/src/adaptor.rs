use crate::cluster::MemoryCluster;

use async_trait::async_trait;
use keyspace_topology::{SlotMap, TopologyAdaptor, TopologyAdaptorError, TopologyAdaptorErrorKind};
use thiserror::Error;

/// Errors from [`MemoryTopologyAdaptor`]
#[derive(Debug, Error)]
pub enum MemoryAdaptorError {
    /// The cluster was told to stop serving its topology
    #[error("cluster topology is offline")]
    Offline,
}

impl TopologyAdaptorError for MemoryAdaptorError {
    fn kind(&self) -> TopologyAdaptorErrorKind {
        match self {
            Self::Offline => TopologyAdaptorErrorKind::Unreachable,
        }
    }
}

/// Serves the slot map of a [`MemoryCluster`] to a `TopologyManager`.
#[derive(Clone, Debug)]
pub struct MemoryTopologyAdaptor {
    cluster: MemoryCluster,
}

impl MemoryTopologyAdaptor {
    /// Create an adaptor for `cluster`
    #[must_use]
    pub const fn new(cluster: MemoryCluster) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl TopologyAdaptor for MemoryTopologyAdaptor {
    type Error = MemoryAdaptorError;

    async fn fetch_slot_map(&self) -> Result<SlotMap, Self::Error> {
        if !self.cluster.is_topology_online() {
            return Err(MemoryAdaptorError::Offline);
        }
        Ok(self.cluster.slot_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use keyspace_topology::{NodeId, Topology, TopologyError, TopologyManager};
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_manager_follows_cluster() {
        let cluster = MemoryCluster::with_node_count(3);
        let manager = TopologyManager::new(Arc::new(cluster.adaptor()));

        cluster.set_topology_online(false);
        assert!(matches!(
            manager.refresh_topology().await,
            Err(TopologyError::Adaptor(_))
        ));
        assert_eq!(manager.all_nodes(), Err(TopologyError::Unavailable));

        cluster.set_topology_online(true);
        assert!(manager.refresh_topology().await.unwrap());
        assert_eq!(manager.all_nodes().unwrap(), cluster.nodes());

        cluster.set_slot_map(SlotMap::split_evenly(&[NodeId::from_seed(9)]));
        assert!(manager.refresh_topology().await.unwrap());
        assert_eq!(manager.node_for_name("foo").unwrap(), NodeId::from_seed(9));
    }
}
