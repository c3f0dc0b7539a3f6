//! A simulated cluster of pub/sub nodes living in one process.

use crate::adaptor::MemoryTopologyAdaptor;
use crate::connection::MemoryConnection;
use crate::node::{ClientState, NodeState, integer};

use std::collections::HashMap;
use std::sync::Arc;

use keyspace_topology::{NodeId, SlotMap, key_slot};
use keyspace_transport::{Command, PubSubQuery, PushKind, Reply, TransportError};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct ClusterState {
    slot_map: SlotMap,
    nodes: HashMap<NodeId, NodeState>,
    topology_online: bool,
}

/// Shared handle to an in-process cluster.
///
/// Every node keeps its own subscriber tables. `PUBLISH` reaches subscribers
/// on all nodes, while shard channels live only on the node owning their slot.
#[derive(Clone, Debug)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Create a cluster whose slots are split evenly over `nodes`
    #[must_use]
    pub fn new(nodes: &[NodeId]) -> Self {
        Self::with_slot_map(SlotMap::split_evenly(nodes))
    }

    /// Create a cluster of `count` nodes named `node-1`, `node-2`, ...
    #[must_use]
    pub fn with_node_count(count: u8) -> Self {
        let nodes: Vec<NodeId> = (1..=count).map(NodeId::from_seed).collect();
        Self::new(&nodes)
    }

    /// Create a cluster serving an explicit slot map
    #[must_use]
    pub fn with_slot_map(slot_map: SlotMap) -> Self {
        info!("Creating memory cluster with {} nodes", slot_map.nodes().len());

        let nodes = slot_map
            .nodes()
            .iter()
            .map(|node| (node.clone(), NodeState::default()))
            .collect();

        Self {
            state: Arc::new(Mutex::new(ClusterState {
                slot_map,
                nodes,
                topology_online: true,
            })),
        }
    }

    /// Nodes in slot map order
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        self.state.lock().slot_map.nodes().to_vec()
    }

    /// Snapshot of the current slot map
    #[must_use]
    pub fn slot_map(&self) -> SlotMap {
        self.state.lock().slot_map.clone()
    }

    /// Move slots around.
    ///
    /// Shard subscriptions whose slot left a node are dropped there and the
    /// affected clients receive a `sunsubscribe` acknowledgement.
    pub fn set_slot_map(&self, slot_map: SlotMap) {
        let mut state = self.state.lock();

        for node in slot_map.nodes() {
            state.nodes.entry(node.clone()).or_default();
        }

        for (node, node_state) in &mut state.nodes {
            node_state
                .evict_shard_channels(|channel| slot_map.owner(key_slot(channel)) == Some(node));
        }

        info!("Memory cluster slot map replaced");
        state.slot_map = slot_map;
    }

    /// Make a node refuse connections and drop the ones it has
    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        info!("Marking {} unreachable: {}", node, unreachable);
        if let Some(node_state) = self.state.lock().nodes.get_mut(node) {
            node_state.set_unreachable(unreachable);
        }
    }

    /// Control whether topology adaptors can fetch the slot map
    pub fn set_topology_online(&self, online: bool) {
        self.state.lock().topology_online = online;
    }

    /// Whether topology adaptors can fetch the slot map
    #[must_use]
    pub fn is_topology_online(&self) -> bool {
        self.state.lock().topology_online
    }

    /// How many times `node` executed a command.
    ///
    /// Commands are keyed by name, with `PUBSUB` including its subcommand
    /// (`"SUBSCRIBE"`, `"PUBSUB SHARDNUMSUB"`).
    #[must_use]
    pub fn command_count(&self, node: &NodeId, command: &str) -> usize {
        self.state
            .lock()
            .nodes
            .get(node)
            .map_or(0, |n| n.command_count(command))
    }

    /// Reset every node's command counters
    pub fn reset_command_counts(&self) {
        for node_state in self.state.lock().nodes.values_mut() {
            node_state.reset_command_counts();
        }
    }

    /// Number of open client connections on `node`
    #[must_use]
    pub fn connection_count(&self, node: &NodeId) -> usize {
        self.state
            .lock()
            .nodes
            .get(node)
            .map_or(0, NodeState::client_count)
    }

    /// A topology adaptor reading this cluster's slot map
    #[must_use]
    pub fn adaptor(&self) -> MemoryTopologyAdaptor {
        MemoryTopologyAdaptor::new(self.clone())
    }

    pub(crate) fn connect(&self, node: &NodeId) -> Result<MemoryConnection, TransportError> {
        let mut state = self.state.lock();
        let node_state = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| TransportError::ConnectionFailed(format!("unknown node {node}")))?;

        if node_state.is_unreachable() {
            return Err(TransportError::ConnectionFailed(format!(
                "node {node} is unreachable"
            )));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = flume::unbounded();
        node_state.register(id, tx);

        debug!("Memory connection {} opened to {}", id, node);
        Ok(MemoryConnection::new(id, node.clone(), self.clone(), rx))
    }

    pub(crate) fn disconnect(&self, node: &NodeId, id: &Uuid) {
        if let Some(node_state) = self.state.lock().nodes.get_mut(node) {
            if node_state.deregister(id) {
                debug!("Memory connection {} to {} closed", id, node);
            }
        }
    }

    pub(crate) fn is_subscribed(&self, node: &NodeId, id: &Uuid) -> bool {
        self.state
            .lock()
            .nodes
            .get(node)
            .and_then(|n| n.client(id))
            .is_some_and(ClientState::is_subscribed)
    }

    /// Run `command` on `node` for client `id`; replies land in its queue
    pub(crate) fn execute(
        &self,
        node: &NodeId,
        id: &Uuid,
        command: Command,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let ClusterState {
            slot_map, nodes, ..
        } = &mut *state;

        let node_state = nodes.get_mut(node).ok_or(TransportError::ConnectionClosed)?;
        if node_state.is_unreachable() {
            return Err(TransportError::ConnectionClosed);
        }
        let subscribed = node_state
            .client(id)
            .ok_or(TransportError::ConnectionClosed)?
            .is_subscribed();
        node_state.record(&command);

        debug!("{} executing {} for {}", node, command, id);

        let reply = match command {
            Command::Subscribe(names) => {
                return with_client(nodes, node, id, |c| c.add(PushKind::Subscribe, &names));
            }
            Command::Unsubscribe(names) => {
                return with_client(nodes, node, id, |c| c.remove(PushKind::Unsubscribe, &names));
            }
            Command::PSubscribe(names) => {
                return with_client(nodes, node, id, |c| c.add(PushKind::PSubscribe, &names));
            }
            Command::PUnsubscribe(names) => {
                return with_client(nodes, node, id, |c| {
                    c.remove(PushKind::PUnsubscribe, &names);
                });
            }
            Command::SSubscribe(names) => match check_slot_owner(slot_map, node, &names) {
                Some(error) => error,
                None => {
                    return with_client(nodes, node, id, |c| c.add(PushKind::SSubscribe, &names));
                }
            },
            Command::SUnsubscribe(names) if spans_slots(&names) => cross_slot(),
            Command::SUnsubscribe(names) => {
                return with_client(nodes, node, id, |c| {
                    c.remove(PushKind::SUnsubscribe, &names);
                });
            }
            other if subscribed => Reply::Error(format!(
                "ERR Can't execute '{}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE are allowed in this context",
                other.name().to_lowercase()
            )),
            Command::Publish { channel, message } => {
                let receivers = nodes.values().map(|n| n.deliver(&channel, &message)).sum();
                integer(receivers)
            }
            Command::SPublish { channel, message } => {
                match check_slot_owner(slot_map, node, std::slice::from_ref(&channel)) {
                    Some(error) => error,
                    None => integer(
                        nodes
                            .get(node)
                            .map_or(0, |n| n.deliver_sharded(&channel, &message)),
                    ),
                }
            }
            Command::PubSub(query) => {
                let node_state = nodes.get(node).ok_or(TransportError::ConnectionClosed)?;
                match query {
                    PubSubQuery::Channels(pattern) => {
                        strings(node_state.channels(pattern.as_deref()))
                    }
                    PubSubQuery::NumSub(names) => node_state.numsub(&names),
                    PubSubQuery::NumPat => integer(node_state.numpat()),
                    PubSubQuery::ShardChannels(pattern) => {
                        strings(node_state.shard_channels(pattern.as_deref()))
                    }
                    PubSubQuery::ShardNumSub(names) => node_state.shard_numsub(&names),
                }
            }
        };

        with_client(nodes, node, id, |c| c.push(reply))
    }
}

fn with_client(
    nodes: &mut HashMap<NodeId, NodeState>,
    node: &NodeId,
    id: &Uuid,
    f: impl FnOnce(&mut ClientState),
) -> Result<(), TransportError> {
    let client = nodes
        .get_mut(node)
        .and_then(|n| n.client_mut(id))
        .ok_or(TransportError::ConnectionClosed)?;
    f(client);
    Ok(())
}

/// Error reply if the names span slots or live on another node
fn check_slot_owner(slot_map: &SlotMap, node: &NodeId, names: &[String]) -> Option<Reply> {
    let slot = key_slot(names.first()?);
    if spans_slots(names) {
        return Some(cross_slot());
    }

    match slot_map.owner(slot) {
        Some(owner) if owner == node => None,
        Some(owner) => Some(Reply::Error(format!("MOVED {slot} {owner}"))),
        None => Some(Reply::Error(
            "CLUSTERDOWN Hash slot not served".to_string(),
        )),
    }
}

fn spans_slots(names: &[String]) -> bool {
    let mut slots = names.iter().map(|name| key_slot(name));
    slots
        .next()
        .is_some_and(|first| slots.any(|slot| slot != first))
}

fn cross_slot() -> Reply {
    Reply::Error("CROSSSLOT Keys in request don't hash to the same slot".to_string())
}

fn strings(values: Vec<String>) -> Reply {
    Reply::Array(values.into_iter().map(Reply::bulk).collect())
}
