//! Cached slot map with periodic refresh

use crate::adaptor::{TopologyAdaptor, TopologyAdaptorError};
use crate::{NodeId, Slot, SlotMap, Topology, TopologyError};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default refresh interval for topology updates
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type CachedMap = Arc<RwLock<Option<Arc<SlotMap>>>>;

/// Bootable state for background tasks
struct BootableState {
    refresh_task: Option<JoinHandle<()>>,
    shutdown_signal: Option<oneshot::Sender<()>>,
}

/// Configuration for the topology manager
#[derive(Clone, Debug)]
pub struct TopologyManagerConfig {
    /// Interval at which to refresh the topology
    pub refresh_interval: Duration,
}

impl Default for TopologyManagerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Holds the current slot map and keeps it fresh from a `TopologyAdaptor`.
///
/// Reads through the [`Topology`] trait never wait on the adaptor; they see
/// whatever map was most recently stored.
pub struct TopologyManager<A>
where
    A: TopologyAdaptor,
{
    cached_map: CachedMap,
    adaptor: Arc<A>,
    /// Bootable state for background tasks
    bootable_state: Arc<Mutex<BootableState>>,
    config: TopologyManagerConfig,
}

impl<A> TopologyManager<A>
where
    A: TopologyAdaptor,
{
    /// Create a new topology manager with default configuration
    pub fn new(adaptor: Arc<A>) -> Self {
        Self::with_config(adaptor, TopologyManagerConfig::default())
    }

    /// Create a new topology manager with custom configuration
    pub fn with_config(adaptor: Arc<A>, config: TopologyManagerConfig) -> Self {
        info!(
            "Creating topology manager with refresh interval {:?}",
            config.refresh_interval
        );

        Self {
            cached_map: Arc::new(RwLock::new(None)),
            adaptor,
            bootable_state: Arc::new(Mutex::new(BootableState {
                refresh_task: None,
                shutdown_signal: None,
            })),
            config,
        }
    }

    /// Load the initial slot map and start the background refresh task
    ///
    /// # Errors
    /// Returns an error if the initial fetch fails.
    pub async fn start(&self) -> Result<(), TopologyError> {
        info!("Starting topology manager");

        self.refresh_topology().await?;
        self.start_refresh_task().await;

        Ok(())
    }

    /// Stop the background refresh task
    pub async fn shutdown(&self) {
        info!("Shutting down topology manager");

        let mut bootable_state = self.bootable_state.lock().await;

        if let Some(shutdown_signal) = bootable_state.shutdown_signal.take() {
            let _ = shutdown_signal.send(());
        }

        if let Some(task) = bootable_state.refresh_task.take() {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Topology refresh task completed"),
                Ok(Err(e)) => warn!("Topology refresh task failed: {}", e),
                Err(_) => warn!("Topology refresh task timed out"),
            }
        }
    }

    /// Fetch the slot map from the adaptor and store it.
    ///
    /// Returns whether the stored map changed.
    ///
    /// # Errors
    /// Returns `TopologyError::Adaptor` if the fetch fails; the previous map is kept.
    pub async fn refresh_topology(&self) -> Result<bool, TopologyError> {
        debug!("Refreshing topology from adaptor");

        let map = self
            .adaptor
            .fetch_slot_map()
            .await
            .map_err(|e| TopologyError::Adaptor(format!("{} ({})", e, e.kind())))?;

        Ok(store_if_changed(&self.cached_map, map))
    }

    /// Replace the cached map directly, bypassing the adaptor
    pub fn replace(&self, map: SlotMap) -> bool {
        store_if_changed(&self.cached_map, map)
    }

    /// Drop the cached map; reads fail with `Unavailable` until the next refresh
    pub fn clear(&self) {
        info!("Clearing cached slot map");
        *self.cached_map.write() = None;
    }

    /// The slot map currently served, if one is loaded
    pub fn slot_map(&self) -> Option<Arc<SlotMap>> {
        self.cached_map.read().clone()
    }

    /// Get adaptor reference
    pub const fn adaptor(&self) -> &Arc<A> {
        &self.adaptor
    }

    async fn start_refresh_task(&self) {
        let cached_map = self.cached_map.clone();
        let adaptor = self.adaptor.clone();
        let refresh_interval = self.config.refresh_interval;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            // The first tick completes immediately and `start` already refreshed
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match adaptor.fetch_slot_map().await {
                            Ok(map) => {
                                store_if_changed(&cached_map, map);
                            }
                            Err(e) => {
                                error!("Failed to refresh topology: {}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Topology refresh task shutting down");
                        break;
                    }
                }
            }
        });

        let mut bootable_state = self.bootable_state.lock().await;
        bootable_state.refresh_task = Some(task);
        bootable_state.shutdown_signal = Some(shutdown_tx);
    }
}

fn store_if_changed(cached_map: &CachedMap, map: SlotMap) -> bool {
    let mut cached = cached_map.write();

    if cached.as_deref() == Some(&map) {
        debug!("Topology unchanged");
        return false;
    }

    info!(
        "Topology changed: {} nodes, fully covered: {}",
        map.nodes().len(),
        map.is_fully_covered()
    );
    *cached = Some(Arc::new(map));
    true
}

impl<A> Topology for TopologyManager<A>
where
    A: TopologyAdaptor,
{
    fn node_for_slot(&self, slot: Slot) -> Result<NodeId, TopologyError> {
        self.cached_map
            .read()
            .as_ref()
            .ok_or(TopologyError::Unavailable)?
            .node_for_slot(slot)
    }

    fn all_nodes(&self) -> Result<Vec<NodeId>, TopologyError> {
        self.cached_map
            .read()
            .as_ref()
            .ok_or(TopologyError::Unavailable)?
            .all_nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TopologyAdaptorErrorKind;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;
    use tracing_test::traced_test;

    #[derive(Debug, Error)]
    #[error("test adaptor offline")]
    struct OfflineError;

    impl TopologyAdaptorError for OfflineError {
        fn kind(&self) -> TopologyAdaptorErrorKind {
            TopologyAdaptorErrorKind::Unreachable
        }
    }

    struct TestAdaptor {
        map: parking_lot::Mutex<Option<SlotMap>>,
        fetches: AtomicUsize,
    }

    impl TestAdaptor {
        fn new(map: Option<SlotMap>) -> Self {
            Self {
                map: parking_lot::Mutex::new(map),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TopologyAdaptor for TestAdaptor {
        type Error = OfflineError;

        async fn fetch_slot_map(&self) -> Result<SlotMap, Self::Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.map.lock().clone().ok_or(OfflineError)
        }
    }

    fn nodes(n: u8) -> Vec<NodeId> {
        (1..=n).map(NodeId::from_seed).collect()
    }

    #[tokio::test]
    async fn test_unavailable_until_loaded() {
        let adaptor = Arc::new(TestAdaptor::new(None));
        let manager = TopologyManager::new(adaptor.clone());

        assert_eq!(manager.node_for_slot(0), Err(TopologyError::Unavailable));
        assert_eq!(manager.all_nodes(), Err(TopologyError::Unavailable));

        // A failed fetch keeps the manager unavailable
        assert!(matches!(
            manager.refresh_topology().await,
            Err(TopologyError::Adaptor(_))
        ));
        assert!(manager.slot_map().is_none());

        *adaptor.map.lock() = Some(SlotMap::split_evenly(&nodes(2)));
        assert!(manager.refresh_topology().await.unwrap());
        assert_eq!(manager.all_nodes().unwrap(), nodes(2));
        assert_eq!(manager.node_for_slot(0).unwrap(), NodeId::from_seed(1));
        assert_eq!(manager.node_for_slot(16383).unwrap(), NodeId::from_seed(2));

        // Refreshing with an identical map reports no change
        assert!(!manager.refresh_topology().await.unwrap());

        manager.clear();
        assert_eq!(manager.node_for_name("foo"), Err(TopologyError::Unavailable));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_background_refresh_picks_up_changes() {
        let adaptor = Arc::new(TestAdaptor::new(Some(SlotMap::split_evenly(&nodes(2)))));
        let manager = TopologyManager::with_config(
            adaptor.clone(),
            TopologyManagerConfig {
                refresh_interval: Duration::from_millis(10),
            },
        );

        manager.start().await.unwrap();
        assert_eq!(manager.all_nodes().unwrap().len(), 2);

        *adaptor.map.lock() = Some(SlotMap::split_evenly(&nodes(3)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.all_nodes().unwrap().len() != 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh task never stored the new map");

        manager.shutdown().await;
        let fetches = adaptor.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(adaptor.fetches.load(Ordering::SeqCst), fetches);
    }
}
